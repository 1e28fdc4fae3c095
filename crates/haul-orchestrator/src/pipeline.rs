//! Diff reconciliation as a typestate pipeline. Rebase, commit, and
//! raw conversion each return a value only the next stage can consume, so
//! out-of-order calls do not compile. A stage failure drops the rest of
//! the pipeline on the floor; a half-rebased diff cannot be resumed.

use haul_remote::{cmd, RemoteError, RemoteSession};
use tracing::info;

/// Entry point: a diff file and its base file, both already present at
/// their declared paths on one remote host.
pub struct DiffPipeline<'a> {
    session: &'a RemoteSession,
    base_file: String,
    diff_file: String,
}

impl<'a> DiffPipeline<'a> {
    pub fn new(
        session: &'a RemoteSession,
        base_file: impl Into<String>,
        diff_file: impl Into<String>,
    ) -> Self {
        Self {
            session,
            base_file: base_file.into(),
            diff_file: diff_file.into(),
        }
    }

    /// Repoint the diff's declared base to the transported base file.
    pub fn rebase(self) -> Result<Rebased<'a>, RemoteError> {
        info!(base = %self.base_file, diff = %self.diff_file, "rebasing diff onto base");
        self.session
            .execute(&cmd::qemu_rebase(&self.base_file, &self.diff_file))?;
        Ok(Rebased {
            session: self.session,
            base_file: self.base_file,
            diff_file: self.diff_file,
        })
    }
}

pub struct Rebased<'a> {
    session: &'a RemoteSession,
    base_file: String,
    diff_file: String,
}

impl<'a> Rebased<'a> {
    /// Merge the diff's deltas into the base file. The base file becomes
    /// the consolidated disk.
    pub fn commit(self) -> Result<Committed<'a>, RemoteError> {
        info!(diff = %self.diff_file, "committing diff into base");
        self.session.execute(&cmd::qemu_commit(&self.diff_file))?;
        Ok(Committed {
            session: self.session,
            merged_file: self.base_file,
        })
    }
}

pub struct Committed<'a> {
    session: &'a RemoteSession,
    merged_file: String,
}

impl Committed<'_> {
    pub fn convert_to_raw(self) -> Result<RawDisk, RemoteError> {
        info!(path = %self.merged_file, "converting merged disk to raw");
        self.session
            .execute(&cmd::qemu_convert_to_raw(&self.merged_file))?;
        Ok(RawDisk {
            path: self.merged_file,
        })
    }
}

/// A consolidated raw disk image, ready for upload to the image service.
pub struct RawDisk {
    path: String,
}

impl RawDisk {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_remote::{CommandOutput, CommandRunner, RemoteError};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl CommandRunner for Recorder {
        fn run(
            &self,
            _host: &str,
            command: &str,
            _forward_agent: bool,
        ) -> Result<CommandOutput, RemoteError> {
            self.calls.lock().expect("lock").push(command.to_string());
            let status = match self.fail_on {
                Some(fragment) if command.contains(fragment) => 1,
                _ => 0,
            };
            Ok(CommandOutput {
                status,
                ..CommandOutput::default()
            })
        }
    }

    #[test]
    fn pipeline_runs_rebase_commit_convert_in_order() {
        let recorder = Arc::new(Recorder::default());
        let session = RemoteSession::new("dst-ctl", recorder.clone(), false);

        let raw = DiffPipeline::new(&session, "/tmp/t-base", "/tmp/t")
            .rebase()
            .and_then(Rebased::commit)
            .and_then(Committed::convert_to_raw)
            .expect("pipeline");
        assert_eq!(raw.path(), "/tmp/t-base");

        let calls = recorder.calls.lock().expect("lock");
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("qemu-img rebase -u -b /tmp/t-base /tmp/t"));
        assert!(calls[1].starts_with("qemu-img commit /tmp/t"));
        assert!(calls[2].starts_with("qemu-img convert -O raw /tmp/t-base"));
    }

    #[test]
    fn commit_failure_aborts_the_rest() {
        let recorder = Arc::new(Recorder {
            fail_on: Some("commit"),
            ..Recorder::default()
        });
        let session = RemoteSession::new("dst-ctl", recorder.clone(), false);

        let rebased = DiffPipeline::new(&session, "/tmp/t-base", "/tmp/t")
            .rebase()
            .expect("rebase");
        assert!(rebased.commit().is_err());

        let calls = recorder.calls.lock().expect("lock");
        assert_eq!(calls.len(), 2, "no conversion after a failed commit");
    }
}
