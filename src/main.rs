//! AutoApply - 一键职位申请自动化引擎
//!
//! 入口：初始化日志、加载配置与答案知识库、打开申请账本，按配置顺序逐个平台运行。
//!
//! ```bash
//! cargo run --features browser -- --config config/local.toml --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autoapply::{
    config::{load_config, AppConfig},
    core::{pacing_from_config, RunCoordinator, ShutdownManager},
    observability, AnswerKnowledgeBase, SqliteLedger,
};
use clap::Parser;
use tracing::{info, warn};

/// 命令行只支持两个开关，其余一律走配置文件与 AUTOAPPLY__* 环境变量
#[derive(Parser, Debug)]
#[command(name = "autoapply", version, about = "One-click job application engine")]
struct CliArgs {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 走完所有步骤但不最终提交
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = CliArgs::parse();
    let mut cfg = load_config(args.config).context("Failed to load config")?;
    if args.dry_run {
        cfg.app.dry_run = true;
    }

    let kb = match AnswerKnowledgeBase::load(&cfg.app.answers_path) {
        Ok(kb) => kb,
        Err(e) => {
            warn!(path = %cfg.app.answers_path.display(), error = %e, "Answer file unavailable, every field will be left unmatched");
            AnswerKnowledgeBase::new()
        }
    };
    info!(answers = kb.len(), "Answer knowledge base loaded");

    let ledger = SqliteLedger::open(&cfg.app.ledger_path)
        .with_context(|| format!("Failed to open ledger at {}", cfg.app.ledger_path.display()))?;
    let pacing = pacing_from_config(&cfg.pacing);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let sessions = session_provider(&cfg)?;
    let report = RunCoordinator::new(sessions.as_ref(), &ledger, &kb, pacing.as_ref())
        .configured(&cfg)
        .with_cancel(shutdown.token())
        .run(&cfg.app.platforms)
        .await
        .context("Run failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "browser")]
fn session_provider(cfg: &AppConfig) -> anyhow::Result<Box<dyn autoapply::browser::SessionProvider>> {
    let provider = autoapply::browser::ChromeSessionProvider::new(cfg.browser.clone());
    Ok(Box::new(provider))
}

#[cfg(not(feature = "browser"))]
fn session_provider(_cfg: &AppConfig) -> anyhow::Result<Box<dyn autoapply::browser::SessionProvider>> {
    anyhow::bail!("autoapply was built without the \"browser\" feature; rebuild with `--features browser`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let args = CliArgs::try_parse_from(["autoapply", "--config=config/local.toml", "--dry-run"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("config/local.toml")));
        assert!(args.dry_run);

        let args = CliArgs::try_parse_from(["autoapply", "-c", "other.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("other.toml")));
        assert!(!args.dry_run);

        assert!(CliArgs::try_parse_from(["autoapply", "--bogus"]).is_err());
    }
}
