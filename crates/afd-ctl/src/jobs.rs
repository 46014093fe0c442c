//! Read-only view of the job identity database.

use afd_config::paths::WorkDir;
use afd_state::dnb::DIR_NAME_FILE;
use afd_state::jid::JOB_ID_DATA_FILE;
use afd_state::{Dnb, Jid};
use serde::Serialize;

use crate::Result;

/// One printable job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLine {
    pub job_id: u32,
    pub dir: String,
    pub priority: char,
    pub host_alias: String,
    pub recipient: String,
    pub loptions: Vec<String>,
}

impl std::fmt::Display for JobLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x} {} {:<8} {} {}",
            self.job_id, self.priority, self.host_alias, self.dir, self.recipient
        )?;
        if !self.loptions.is_empty() {
            write!(f, " [{}]", self.loptions.join("; "))?;
        }
        Ok(())
    }
}

/// Every job, optionally only those bound to `host`
pub fn list_jobs(work: &WorkDir, host: Option<&str>) -> Result<Vec<JobLine>> {
    let fifo_dir = work.fifo_dir();
    let mut jid = Jid::attach(&fifo_dir.join(JOB_ID_DATA_FILE))?;
    // Directory names are cosmetic here; fall back to the id.
    let mut dnb = Dnb::attach(&fifo_dir.join(DIR_NAME_FILE)).ok();

    Ok(jid
        .records()
        .iter()
        .filter(|j| host.map_or(true, |h| j.host_alias() == h))
        .map(|j| JobLine {
            job_id: j.job_id,
            dir: dnb
                .as_mut()
                .and_then(|d| d.name_of(j.dir_id))
                .unwrap_or_else(|| format!("{:x}", j.dir_id)),
            priority: j.priority as char,
            host_alias: j.host_alias(),
            recipient: j.recipient(),
            loptions: j.loptions(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;
    use afd_state::JobSpec;

    #[test]
    fn test_list_and_filter() {
        let env = TestEnvironment::new().unwrap();
        let fifo_dir = env.layout().fifo_dir();
        let mut dnb = Dnb::open_or_create(&fifo_dir.join(DIR_NAME_FILE)).unwrap();
        let (dir_id, _) = dnb.lookup_or_insert("/data/in").unwrap();
        let mut jid = Jid::open_or_create(&fifo_dir.join(JOB_ID_DATA_FILE)).unwrap();
        for host in ["alpha", "beta"] {
            let spec = JobSpec {
                dir_id,
                host_alias: host.into(),
                recipient: format!("ftp://{}/out", host),
                loptions: vec!["toupper".into()],
                priority: b'5',
                ..Default::default()
            };
            jid.insert(&spec, 1).unwrap();
        }

        let all = list_jobs(&env.layout(), None).unwrap();
        assert_eq!(all.len(), 2);
        let beta = list_jobs(&env.layout(), Some("beta")).unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].dir, "/data/in");
        assert_eq!(beta[0].priority, '5');
        assert!(beta[0].to_string().ends_with("ftp://beta/out [toupper]"));

        let json = serde_json::to_value(&beta[0]).unwrap();
        assert_eq!(json["host_alias"], "beta");
        assert_eq!(json["loptions"][0], "toupper");
    }
}
