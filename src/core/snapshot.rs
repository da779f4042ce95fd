//! 诊断快照：`{日期}_{平台}_{jobId}.png`，同名覆盖，失败只记日志

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::browser::Page;

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 快照路径（文件名中的非安全字符替换为 `_`）
    pub fn path_for(&self, date: NaiveDate, platform: &str, job_id: &str) -> PathBuf {
        let name = format!(
            "{}_{}_{}.png",
            date.format("%Y-%m-%d"),
            sanitize(platform),
            sanitize(job_id)
        );
        self.dir.join(name)
    }

    /// 尽力截图；成功返回路径
    pub async fn capture(&self, page: &dyn Page, platform: &str, job_id: &str) -> Option<PathBuf> {
        let path = self.path_for(Utc::now().date_naive(), platform, job_id);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Cannot create snapshot dir");
            return None;
        }
        match page.screenshot(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Snapshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot failed");
                None
            }
        }
    }
}

fn sanitize(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockPage;

    #[test]
    fn test_path_is_sanitized() {
        let w = SnapshotWriter::new("/tmp/snaps");
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            w.path_for(date, "linkedin", "urn:li/123?x"),
            PathBuf::from("/tmp/snaps/2026-03-07_linkedin_urn_li_123_x.png")
        );
    }

    #[tokio::test]
    async fn test_capture_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let w = SnapshotWriter::new(dir.path().join("nested"));
        let page = MockPage::new("https://jobs.test/");
        let path = w.capture(&page, "indeed", "abc").await.unwrap();
        assert!(dir.path().join("nested").is_dir());
        assert_eq!(page.screenshots(), vec![path]);
    }
}
