//! Hyperlinks for runs, stages, and jobs.

use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, RunId};

/// Hyperlinks attached to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLinks {
    /// The run's own description.
    #[serde(rename = "self")]
    pub self_href: String,
    /// The run's artifacts.
    pub artifacts: String,
    /// The run's change sets.
    pub changesets: String,
}

/// Hyperlinks attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLinks {
    /// The job's own description.
    #[serde(rename = "self")]
    pub self_href: String,
    /// The job's run listing.
    pub runs: String,
}

/// Builds hrefs below a fixed URL prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkBuilder {
    prefix: String,
}

impl LinkBuilder {
    /// Creates a builder. A trailing slash on `prefix` is ignored.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// The prefix every href starts with.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn job_base(&self, job: &str) -> String {
        format!("{}/job/{}", self.prefix, encode_path_segment(job))
    }

    fn run_base(&self, run: &RunId) -> String {
        format!("{}/{}", self.job_base(&run.job), run.number)
    }

    /// Links of a job.
    #[must_use]
    pub fn job(&self, job: &str) -> JobLinks {
        let base = self.job_base(job);
        JobLinks {
            self_href: format!("{base}/wfapi/describe"),
            runs: format!("{base}/wfapi/runs"),
        }
    }

    /// Links of a run.
    #[must_use]
    pub fn run(&self, run: &RunId) -> RunLinks {
        let base = self.run_base(run);
        RunLinks {
            self_href: format!("{base}/wfapi/describe"),
            artifacts: format!("{base}/wfapi/artifacts"),
            changesets: format!("{base}/wfapi/changesets"),
        }
    }

    /// Description href of the stage opened by `node`.
    #[must_use]
    pub fn stage(&self, run: &RunId, node: NodeId) -> String {
        format!("{}/execution/node/{node}/wfapi/describe", self.run_base(run))
    }
}

/// Percent-encodes everything but RFC 3986 unreserved characters.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
