//! Built-in task commands

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::process::runner::{ProcessHandle, ProcessRunSpec, ProcessRunner};

use super::runner::{TaskCommand, TaskCommandArgs, TaskCommandResult};

/// Verb the process-execution command is registered under
pub const RUN_VERB: &str = "run";

/// Executes a program inside the container.
///
/// The first argument names the executable, the rest become its argument
/// vector. Output is buffered and returned in the result triple; the exit
/// code passes through unchanged.
pub struct RunCommand;

#[async_trait]
impl TaskCommand for RunCommand {
    async fn execute(&self, args: TaskCommandArgs) -> Result<TaskCommandResult> {
        let (program, rest) = args
            .arguments
            .split_first()
            .ok_or_else(|| Error::InvalidInput("run requires a program argument".into()))?;

        let spec = ProcessRunSpec {
            executable: program.into(),
            arguments: rest.to_vec(),
            working_directory: Some(args.context.working_directory.clone()),
            environment: (!args.context.environment.is_empty())
                .then(|| args.context.environment.clone()),
            buffered_io: true,
            ..ProcessRunSpec::default()
        };

        let handle = args.context.runner.run(spec).await?;
        let exit_code = handle.wait().await?;

        Ok(TaskCommandResult {
            exit_code,
            stdout: handle.stdout(),
            stderr: handle.stderr(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::runner::CommandContext;
    use crate::platform::users::{LogonToken, UserCredential, UserManager};
    use crate::process::runner::LocalProcessRunner;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct StubUsers;

    #[async_trait]
    impl UserManager for StubUsers {
        async fn create_user(&self, name: &str) -> Result<UserCredential> {
            Ok(UserCredential::new(name, "pw"))
        }

        async fn delete_user(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn get_sid(&self, name: &str) -> Result<String> {
            Ok(format!("S-1-5-21-{}", name))
        }

        async fn add_to_group(&self, _name: &str, _group: &str) -> Result<()> {
            Ok(())
        }

        async fn logon_user(&self, _credential: &UserCredential) -> Result<LogonToken> {
            Ok(LogonToken::new(1))
        }

        async fn load_user_environment(
            &self,
            _token: &LogonToken,
        ) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }
    }

    fn context(dir: PathBuf) -> CommandContext {
        CommandContext {
            runner: Arc::new(LocalProcessRunner::new(Arc::new(StubUsers))),
            working_directory: dir,
            environment: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_run_returns_result_triple() {
        let temp = TempDir::new().unwrap();

        let result = RunCommand
            .execute(TaskCommandArgs {
                arguments: vec![
                    "/bin/sh".into(),
                    "-c".into(),
                    "printf out; printf err 1>&2; exit 4".into(),
                ],
                context: context(temp.path().to_path_buf()),
            })
            .await
            .unwrap();

        assert_eq!(result.exit_code, 4);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_requires_a_program() {
        let temp = TempDir::new().unwrap();

        let err = RunCommand
            .execute(TaskCommandArgs {
                arguments: vec![],
                context: context(temp.path().to_path_buf()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
