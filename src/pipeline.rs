//! The deploy pipeline: source update, dependency install, service restart.
//!
//! Each step builds its command from the configuration and turns the
//! command's result into a [`NextAction`]. [`run_pipeline`] walks the steps
//! in order and stops at the first action that is not `Continue`.

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::command::{CommandResult, CommandRunner, CommandSpec};
use crate::config::{DeployConfig, InstallFailurePolicy};

/// `git pull` prints one of these when nothing was fetched.
const UP_TO_DATE_MARKERS: &[&str] = &["Already up to date.", "Already up-to-date."];

pub const MSG_PULL_FAILED: &str = "Git pull failed";
pub const MSG_UP_TO_DATE: &str = "Already up to date";
pub const MSG_INSTALL_FAILED: &str = "Failed to install requirements";
pub const MSG_SUCCESS: &str = "Webhook processed successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    GitPull,
    PipInstall,
    ServiceRestart,
}

/// What the pipeline does after a step has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    Stop { status: StatusCode, message: String },
    SkipRemaining { message: String },
}

impl DeployStep {
    /// Execution order. Never reorder.
    pub const ALL: [DeployStep; 3] = [
        DeployStep::GitPull,
        DeployStep::PipInstall,
        DeployStep::ServiceRestart,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeployStep::GitPull => "git_pull",
            DeployStep::PipInstall => "pip_install",
            DeployStep::ServiceRestart => "service_restart",
        }
    }

    pub fn command(&self, config: &DeployConfig) -> CommandSpec {
        match self {
            DeployStep::GitPull => CommandSpec::new(
                "git",
                ["pull".to_string(), config.remote.clone(), config.branch.clone()],
            )
            .current_dir(&config.repo_path),
            DeployStep::PipInstall => CommandSpec::new(
                config.pip_executable().to_string_lossy(),
                [
                    "install".to_string(),
                    "-r".to_string(),
                    config.requirements_path().to_string_lossy().into_owned(),
                ],
            )
            .current_dir(&config.repo_path),
            DeployStep::ServiceRestart => {
                let restart = ["restart".to_string(), config.service_name.clone()];
                if config.restart_with_sudo {
                    CommandSpec::new(
                        "sudo",
                        std::iter::once("systemctl".to_string()).chain(restart),
                    )
                } else {
                    CommandSpec::new("systemctl", restart)
                }
            }
        }
    }

    pub fn evaluate(&self, result: &CommandResult, config: &DeployConfig) -> NextAction {
        match self {
            DeployStep::GitPull => {
                if !result.success {
                    error!(target: "deploy::git_pull", "git pull failed");
                    return NextAction::Stop {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        message: MSG_PULL_FAILED.to_string(),
                    };
                }
                if UP_TO_DATE_MARKERS
                    .iter()
                    .any(|marker| result.stdout.contains(marker))
                {
                    info!(target: "deploy::git_pull", "No new changes, restart not required");
                    return NextAction::SkipRemaining {
                        message: MSG_UP_TO_DATE.to_string(),
                    };
                }
                NextAction::Continue
            }
            DeployStep::PipInstall => {
                if result.success {
                    return NextAction::Continue;
                }
                match config.install_failure {
                    InstallFailurePolicy::Continue => {
                        warn!(
                            target: "deploy::pip_install",
                            "Failed to update dependencies, restarting {} anyway",
                            config.service_name
                        );
                        NextAction::Continue
                    }
                    InstallFailurePolicy::Abort => {
                        error!(
                            target: "deploy::pip_install",
                            "Failed to update dependencies, not restarting {}",
                            config.service_name
                        );
                        NextAction::Stop {
                            status: StatusCode::INTERNAL_SERVER_ERROR,
                            message: MSG_INSTALL_FAILED.to_string(),
                        }
                    }
                }
            }
            DeployStep::ServiceRestart => {
                if result.success {
                    return NextAction::Continue;
                }
                error!(
                    target: "deploy::service_restart",
                    "Failed to restart service {}", config.service_name
                );
                NextAction::Stop {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: format!("Failed to restart service {}", config.service_name),
                }
            }
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Success,
    UpToDate,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: DeployStep,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub status: DeployStatus,
    pub http_status: StatusCode,
    pub message: String,
    pub steps: Vec<StepReport>,
}

/// Run every step in order. Nothing is retried and nothing is rolled back.
pub async fn run_pipeline(config: &DeployConfig, runner: &dyn CommandRunner) -> DeployOutcome {
    let mut steps = Vec::with_capacity(DeployStep::ALL.len());

    for step in DeployStep::ALL {
        info!("Deploy step '{}' starting", step.name());
        let spec = step.command(config);
        let result = runner.run(&spec).await;
        steps.push(StepReport {
            step,
            success: result.success,
        });

        match step.evaluate(&result, config) {
            NextAction::Continue => {}
            NextAction::Stop { status, message } => {
                return DeployOutcome {
                    status: DeployStatus::Failed,
                    http_status: status,
                    message,
                    steps,
                };
            }
            NextAction::SkipRemaining { message } => {
                return DeployOutcome {
                    status: DeployStatus::UpToDate,
                    http_status: StatusCode::OK,
                    message,
                    steps,
                };
            }
        }
    }

    info!("Update and restart of {} completed", config.service_name);
    DeployOutcome {
        status: DeployStatus::Success,
        http_status: StatusCode::OK,
        message: MSG_SUCCESS.to_string(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileSettings;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Replays scripted results and records every command it was asked to run.
    struct ScriptedRunner {
        results: Mutex<VecDeque<CommandResult>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<CommandResult>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> CommandResult {
            self.calls.lock().unwrap().push(spec.clone());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandResult::success(""))
        }
    }

    fn config_with(pairs: &[(&str, &str)]) -> DeployConfig {
        let mut pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pairs.push(("WEBHOOK_SECRET".to_string(), "s3cret".to_string()));
        pairs.push(("REPO_PATH".to_string(), "/srv/bot".to_string()));
        pairs.push(("SERVICE_NAME".to_string(), "bot.service".to_string()));
        DeployConfig::resolve(FileSettings::default(), move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn commands_match_deploy_layout() {
        let config = config_with(&[]);

        let pull = DeployStep::GitPull.command(&config);
        assert_eq!(pull.to_string(), "git pull origin main");
        assert_eq!(pull.cwd, Some(PathBuf::from("/srv/bot")));

        let install = DeployStep::PipInstall.command(&config);
        assert_eq!(
            install.to_string(),
            "/srv/bot/venv/bin/pip install -r /srv/bot/requirements.txt"
        );
        assert_eq!(install.cwd, Some(PathBuf::from("/srv/bot")));

        let restart = DeployStep::ServiceRestart.command(&config);
        assert_eq!(restart.to_string(), "sudo systemctl restart bot.service");
        assert_eq!(restart.cwd, None);
    }

    #[test]
    fn restart_without_sudo() {
        let config = config_with(&[("RESTART_WITH_SUDO", "false")]);
        let restart = DeployStep::ServiceRestart.command(&config);
        assert_eq!(restart.to_string(), "systemctl restart bot.service");
    }

    #[tokio::test]
    async fn up_to_date_pull_skips_install_and_restart() {
        let config = config_with(&[]);
        let runner = ScriptedRunner::new(vec![CommandResult::success("Already up to date.\n")]);

        let outcome = run_pipeline(&config, &runner).await;

        assert_eq!(outcome.status, DeployStatus::UpToDate);
        assert_eq!(outcome.http_status, StatusCode::OK);
        assert_eq!(outcome.message, MSG_UP_TO_DATE);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn legacy_up_to_date_wording_is_recognised() {
        let config = config_with(&[]);
        let runner = ScriptedRunner::new(vec![CommandResult::success("Already up-to-date.\n")]);
        let outcome = run_pipeline(&config, &runner).await;
        assert_eq!(outcome.status, DeployStatus::UpToDate);
    }

    #[tokio::test]
    async fn failed_pull_stops_pipeline() {
        let config = config_with(&[]);
        let runner = ScriptedRunner::new(vec![CommandResult::failure("fatal: not a git repository")]);

        let outcome = run_pipeline(&config, &runner).await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert_eq!(outcome.http_status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.message, MSG_PULL_FAILED);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn install_failure_is_tolerated_by_default() {
        let config = config_with(&[]);
        let runner = ScriptedRunner::new(vec![
            CommandResult::success("Updating 1a2b3c..4d5e6f\nFast-forward\n"),
            CommandResult::failure("ERROR: No matching distribution"),
            CommandResult::success(""),
        ]);

        let outcome = run_pipeline(&config, &runner).await;

        assert_eq!(outcome.status, DeployStatus::Success);
        assert_eq!(outcome.http_status, StatusCode::OK);
        assert_eq!(outcome.message, MSG_SUCCESS);
        assert_eq!(runner.calls().len(), 3);
        assert_eq!(
            outcome.steps,
            vec![
                StepReport { step: DeployStep::GitPull, success: true },
                StepReport { step: DeployStep::PipInstall, success: false },
                StepReport { step: DeployStep::ServiceRestart, success: true },
            ]
        );
        assert!(logs_contain("Failed to update dependencies, restarting bot.service anyway"));
    }

    #[tokio::test]
    #[traced_test]
    async fn install_failure_aborts_under_abort_policy() {
        let config = config_with(&[("INSTALL_FAILURE_POLICY", "abort")]);
        let runner = ScriptedRunner::new(vec![
            CommandResult::success("Fast-forward\n"),
            CommandResult::failure("ERROR: No matching distribution"),
        ]);

        let outcome = run_pipeline(&config, &runner).await;

        assert_eq!(outcome.http_status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.message, MSG_INSTALL_FAILED);
        assert_eq!(runner.calls().len(), 2);
        assert!(logs_contain("Failed to update dependencies, not restarting bot.service"));
    }

    #[tokio::test]
    async fn failed_restart_reports_service_name() {
        let config = config_with(&[]);
        let runner = ScriptedRunner::new(vec![
            CommandResult::success("Fast-forward\n"),
            CommandResult::success("Successfully installed"),
            CommandResult::failure("Unit bot.service not found."),
        ]);

        let outcome = run_pipeline(&config, &runner).await;

        assert_eq!(outcome.status, DeployStatus::Failed);
        assert_eq!(outcome.http_status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.message, "Failed to restart service bot.service");
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn evaluate_is_independent_of_runner() {
        let config = config_with(&[]);
        assert_eq!(
            DeployStep::ServiceRestart.evaluate(&CommandResult::success(""), &config),
            NextAction::Continue
        );
        assert_eq!(
            DeployStep::GitPull.evaluate(&CommandResult::failure("boom"), &config),
            NextAction::Stop {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: MSG_PULL_FAILED.to_string(),
            }
        );
    }
}
