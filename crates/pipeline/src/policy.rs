//! Failure policy per pipeline stage.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Stage of the pipeline a task was running when it failed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[display("enumeration")]
    Enumeration,
    #[display("fetch")]
    Fetch,
    #[display("decode")]
    Decode,
    #[display("publish")]
    Publish,
}

/// What a failure does to the rest of the run.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Cancel the run; the first such error is returned once every task has unwound.
    #[display("abort")]
    Abort,
    /// Log and count the failure, siblings carry on.
    #[default]
    #[display("isolate")]
    Isolate,
}

/// Policy for each configurable stage.
///
/// Enumeration has no entry: a failed listing always aborts the run, since
/// there is no way to know what was missed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    pub fetch: Policy,
    pub decode: Policy,
    pub publish: Policy,
}
impl Policies {
    /// Every configurable stage set to `policy`.
    pub fn all(policy: Policy) -> Self {
        Self { fetch: policy, decode: policy, publish: policy }
    }

    pub fn for_stage(&self, stage: Stage) -> Policy {
        match stage {
            Stage::Enumeration => Policy::Abort,
            Stage::Fetch => self.fetch,
            Stage::Decode => self.decode,
            Stage::Publish => self.publish,
        }
    }
}
