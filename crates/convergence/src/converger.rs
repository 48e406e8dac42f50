//! Converger - walks the graph and drives each resource to its state
//!
//! Per resource: `Pending -> Skipped | Unchanged | Converging -> (Converged | Failed)`.
//! Resources are visited strictly one at a time in graph order. Nothing is
//! retried or reordered, and nothing is rolled back after an abort.

use crate::action::{ActionExecutor, ActionResult};
use crate::context::{ApplyContext, ProgressCallback};
use crate::graph::ResourceGraph;
use crate::guard::GuardEvaluator;
use crate::report::{ExecutionOutcome, OutcomeStatus, RunReport, RunStatus, Trigger};
use crate::resource::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Detail recorded for resources a dry run would have acted on
pub const DRY_RUN_DETAIL: &str = "would converge";

/// Shared flag asking a run to stop before its next resource
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Evaluate guards only; never invoke an action
    pub dry_run: bool,
}

/// How a visit ended, as far as the run is concerned
enum Verdict {
    Continue,
    /// Failed in a way the resource did not declare acceptable
    Abort,
}

/// Drives a [`ResourceGraph`] to convergence
pub struct Converger<'a> {
    ctx: &'a ApplyContext<'a>,
    options: RunOptions,
    cancel: CancelToken,
}

impl<'a> Converger<'a> {
    pub fn new(ctx: &'a ApplyContext<'a>) -> Self {
        Self {
            ctx,
            options: RunOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the graph and report what happened
    ///
    /// The declared pass visits every resource in order. If it completes,
    /// notifications queued by converged resources run once each, in the
    /// order they were first queued.
    pub fn run<P: ProgressCallback>(&self, graph: &ResourceGraph, progress: &mut P) -> RunReport {
        let mut report = RunReport::start(self.options.dry_run);
        let guard = GuardEvaluator::new(self.ctx);
        let executor = ActionExecutor::new(self.ctx);

        let mut queued: Vec<(usize, usize)> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut aborted = false;

        let order = graph.order();
        for (step, &index) in order.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("Run cancelled");
                report.cancelled = true;
                skip_rest(&mut report, graph, &order[step..], "not run: cancelled", progress);
                aborted = true;
                break;
            }

            let resource = graph.get(index);
            progress.on_resource_start(resource);
            let (outcome, verdict) = self.visit(resource, &guard, &executor);

            if outcome.status == OutcomeStatus::Converged {
                for &target in graph.notifications_of(index) {
                    if seen.insert(target) {
                        queued.push((target, index));
                    }
                }
            }

            progress.on_resource_complete(&outcome);
            report.record(outcome);

            if let Verdict::Abort = verdict {
                // A child killed by the cancelling signal fails its resource
                let detail = if self.cancel.is_cancelled() {
                    log::warn!("Run cancelled while {resource} was running");
                    report.cancelled = true;
                    "not run: cancelled"
                } else {
                    log::error!("{resource} failed, aborting run");
                    "not run: run aborted"
                };
                skip_rest(&mut report, graph, &order[step + 1..], detail, progress);
                aborted = true;
                break;
            }
        }

        if !aborted {
            aborted = self.notify(graph, &queued, &executor, &mut report, progress);
        }
        if !aborted && self.cancel.is_cancelled() {
            log::warn!("Run cancelled");
            report.cancelled = true;
            aborted = true;
        }

        let status = if aborted {
            RunStatus::Aborted
        } else if !report.summary().is_success() {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::CompletedClean
        };
        report.finish(status);
        report
    }

    /// Run queued notifications; returns whether the run aborted
    fn notify<P: ProgressCallback>(
        &self,
        graph: &ResourceGraph,
        queued: &[(usize, usize)],
        executor: &ActionExecutor<'_>,
        report: &mut RunReport,
        progress: &mut P,
    ) -> bool {
        for (step, &(target, from)) in queued.iter().enumerate() {
            let resource = graph.get(target);
            let trigger = Trigger::Notification {
                from: graph.get(from).reference().clone(),
            };

            if self.cancel.is_cancelled() {
                report.cancelled = true;
                for &(rest, from) in &queued[step..] {
                    let outcome = ExecutionOutcome::skipped(
                        graph.get(rest).reference().clone(),
                        "not run: cancelled",
                    )
                    .with_trigger(Trigger::Notification {
                        from: graph.get(from).reference().clone(),
                    });
                    progress.on_resource_complete(&outcome);
                    report.record(outcome);
                }
                return true;
            }

            log::info!("{} notified by {}", resource, graph.get(from));
            progress.on_resource_start(resource);
            let started = Instant::now();
            let (outcome, verdict) = match executor.notify(resource) {
                Ok(result) => self.judge(resource, result, None),
                Err(e) => (
                    ExecutionOutcome::new(resource.reference().clone(), OutcomeStatus::Failed)
                        .with_error(e.to_string()),
                    self.failure_verdict(resource),
                ),
            };
            let outcome = outcome
                .with_trigger(trigger)
                .with_duration(started.elapsed());

            progress.on_resource_complete(&outcome);
            report.record(outcome);

            if let Verdict::Abort = verdict {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                }
                log::error!("{resource} failed, aborting run");
                return true;
            }
        }
        false
    }

    fn visit(
        &self,
        resource: &Resource,
        guard: &GuardEvaluator<'_>,
        executor: &ActionExecutor<'_>,
    ) -> (ExecutionOutcome, Verdict) {
        let started = Instant::now();
        let reference = resource.reference().clone();

        let note = match guard.is_satisfied(resource) {
            Ok(true) => {
                log::debug!("{reference} already converged");
                let outcome = ExecutionOutcome::new(reference, OutcomeStatus::Unchanged);
                return (outcome.with_duration(started.elapsed()), Verdict::Continue);
            }
            Ok(false) => None,
            Err(e) if resource.is_destructive() => {
                // Never remove what could not be inspected
                log::error!("{e}");
                let outcome = ExecutionOutcome::new(reference, OutcomeStatus::Failed)
                    .with_error(e.to_string())
                    .with_duration(started.elapsed());
                return (outcome, Verdict::Abort);
            }
            Err(e) => {
                log::warn!("{e}; applying anyway");
                Some(format!("{e}; applied anyway"))
            }
        };

        if self.options.dry_run {
            let detail = match note {
                Some(note) => format!("{DRY_RUN_DETAIL} ({note})"),
                None => DRY_RUN_DETAIL.to_string(),
            };
            let outcome = ExecutionOutcome::skipped(reference, detail);
            return (outcome.with_duration(started.elapsed()), Verdict::Continue);
        }

        log::info!("{}", resource.description());
        let (outcome, verdict) = match executor.apply(resource) {
            Ok(result) => self.judge(resource, result, note),
            Err(e) => {
                let mut outcome =
                    ExecutionOutcome::new(reference, OutcomeStatus::Failed).with_error(e.to_string());
                outcome.detail = note;
                (outcome, self.failure_verdict(resource))
            }
        };
        (outcome.with_duration(started.elapsed()), verdict)
    }

    fn judge(
        &self,
        resource: &Resource,
        result: ActionResult,
        note: Option<String>,
    ) -> (ExecutionOutcome, Verdict) {
        let reference = resource.reference().clone();
        if result.success {
            let detail = join_details(note, result.detail);
            let mut outcome = ExecutionOutcome::new(reference, OutcomeStatus::Converged)
                .with_exit_code(result.exit_code);
            outcome.detail = detail;
            (outcome, Verdict::Continue)
        } else {
            let error = result
                .detail
                .unwrap_or_else(|| "action reported failure".to_string());
            log::warn!("{reference}: {error}");
            let mut outcome = ExecutionOutcome::new(reference, OutcomeStatus::Failed)
                .with_error(error)
                .with_exit_code(result.exit_code);
            outcome.detail = note;
            (outcome, self.failure_verdict(resource))
        }
    }

    fn failure_verdict(&self, resource: &Resource) -> Verdict {
        if resource.failure_is_acceptable() {
            Verdict::Continue
        } else {
            Verdict::Abort
        }
    }
}

fn join_details(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) => Some(format!("{a}; {b}")),
        (a, b) => a.or(b),
    }
}

fn skip_rest<P: ProgressCallback>(
    report: &mut RunReport,
    graph: &ResourceGraph,
    rest: &[usize],
    detail: &str,
    progress: &mut P,
) {
    for &index in rest {
        let outcome = ExecutionOutcome::skipped(graph.get(index).reference().clone(), detail);
        progress.on_resource_complete(&outcome);
        report.record(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoProgress, ServiceState};
    use crate::environment::EnvironmentMapping;
    use crate::properties::{
        AccountId, DirectoryAction, DirectoryAttrs, ExecuteAttrs, ExportAttrs, FileAttrs,
        GitAttrs, GroupAttrs, Mode, PackageAttrs, Properties, ServiceAction, ServiceAttrs,
        UnitFormat, UserAttrs,
    };
    use crate::resource::{Reference, ResourceKind, ResourceRef};
    use crate::testing::MemoryHost;

    fn run(host: &MemoryHost, resources: Vec<Resource>) -> RunReport {
        run_with(host, resources, RunOptions::default())
    }

    fn run_with(host: &MemoryHost, resources: Vec<Resource>, options: RunOptions) -> RunReport {
        let env = EnvironmentMapping::new();
        let ctx = host.context(&env);
        let graph = ResourceGraph::from_resources(resources).unwrap();
        Converger::new(&ctx)
            .with_options(options)
            .run(&graph, &mut NoProgress)
    }

    fn statuses(report: &RunReport) -> Vec<OutcomeStatus> {
        report.outcomes().iter().map(|o| o.status).collect()
    }

    fn exec(command: &str) -> Resource {
        Resource::new(command, Properties::Execute(ExecuteAttrs::command(command)))
    }

    fn dir(path: &str, owner: Option<&str>, mode: Option<u32>) -> Resource {
        Resource::new(
            path,
            Properties::Directory(DirectoryAttrs {
                owner: owner.map(Into::into),
                mode: mode.map(|m| Mode::new(m).unwrap()),
                ..Default::default()
            }),
        )
    }

    fn delete_dir(path: &str) -> Resource {
        Resource::new(
            path,
            Properties::Directory(DirectoryAttrs {
                action: DirectoryAction::Delete,
                recursive: true,
                ..Default::default()
            }),
        )
    }

    fn web_stack() -> Vec<Resource> {
        vec![
            Resource::new("web", Properties::Group(GroupAttrs::default())),
            Resource::new(
                "web",
                Properties::User(UserAttrs {
                    gid: Some(AccountId::Name("web".into())),
                    ..Default::default()
                }),
            ),
            dir("/srv/app", Some("web"), Some(0o755)),
        ]
    }

    #[test]
    fn test_end_to_end_converges_then_unchanged() {
        let host = MemoryHost::new();

        let first = run(&host, web_stack());
        assert_eq!(statuses(&first), vec![OutcomeStatus::Converged; 3]);
        assert_eq!(first.status, RunStatus::CompletedClean);
        assert_eq!(
            host.account_info("web").unwrap().group.as_deref(),
            Some("web")
        );

        let second = run(&host, web_stack());
        assert_eq!(statuses(&second), vec![OutcomeStatus::Unchanged; 3]);
        assert_eq!(second.status, RunStatus::CompletedClean);
    }

    #[test]
    fn test_idempotent_file_and_package() {
        let host = MemoryHost::new();
        let resources = || {
            vec![
                Resource::new(
                    "git",
                    Properties::Package(PackageAttrs {
                        version: Some("1:2.34".into()),
                        ..Default::default()
                    }),
                ),
                Resource::new(
                    "/etc/motd",
                    Properties::File(FileAttrs {
                        content: Some("welcome\n".into()),
                        mode: Some(Mode::new(0o644).unwrap()),
                        ..Default::default()
                    }),
                ),
            ]
        };

        assert_eq!(
            statuses(&run(&host, resources())),
            vec![OutcomeStatus::Converged; 2]
        );
        let content = host.contents("/etc/motd");
        assert_eq!(
            statuses(&run(&host, resources())),
            vec![OutcomeStatus::Unchanged; 2]
        );
        assert_eq!(host.contents("/etc/motd"), content);
        assert_eq!(host.installed("git").as_deref(), Some("1:2.34"));
    }

    #[test]
    fn test_declaration_order_is_execution_order() {
        let host = MemoryHost::new();
        run(&host, vec![exec("first"), exec("second"), exec("third")]);

        let commands: Vec<_> = host.commands_run().into_iter().map(|c| c.command).collect();
        assert_eq!(commands, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_redefinition_keeps_position_and_later_attributes() {
        let host = MemoryHost::new();
        let report = run(
            &host,
            vec![
                dir("/srv/a", Some("root"), None),
                exec("between"),
                dir("/srv/a", Some("web"), None),
            ],
        );

        assert_eq!(report.outcomes().len(), 2);
        assert_eq!(report.outcomes()[0].resource.identifier, "/srv/a");
        assert_eq!(host.metadata("/srv/a").unwrap().owner.as_deref(), Some("web"));
    }

    #[test]
    fn test_failed_delete_aborts_run() {
        let host = MemoryHost::new();
        host.add_dir("/var/opt/work", "root", "root", 0o755);
        host.deny_remove("/var/opt/work");

        let report = run(
            &host,
            vec![exec("before"), delete_dir("/var/opt/work"), exec("after"), exec("last")],
        );

        assert_eq!(
            statuses(&report),
            vec![
                OutcomeStatus::Converged,
                OutcomeStatus::Failed,
                OutcomeStatus::Skipped,
                OutcomeStatus::Skipped,
            ]
        );
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(!report.cancelled);
        assert_eq!(host.commands_run().len(), 1);
    }

    #[test]
    fn test_accepted_exit_code_continues() {
        let host = MemoryHost::new();
        host.script_command("grep -q web /etc/passwd", 1);

        let report = run(
            &host,
            vec![exec("grep -q web /etc/passwd").accepting([0, 1]), exec("next")],
        );

        let first = &report.outcomes()[0];
        assert_eq!(first.status, OutcomeStatus::Converged);
        assert_eq!(first.exit_code, Some(1));
        assert_eq!(report.outcomes()[1].status, OutcomeStatus::Converged);
        assert_eq!(report.status, RunStatus::CompletedClean);
    }

    #[test]
    fn test_ignored_failure_completes_with_failures() {
        let host = MemoryHost::new();
        host.script_command("false", 1);

        let report = run(&host, vec![exec("false").ignoring_failure(), exec("next")]);

        assert_eq!(
            statuses(&report),
            vec![OutcomeStatus::Failed, OutcomeStatus::Converged]
        );
        assert_eq!(report.outcomes()[0].exit_code, Some(1));
        assert_eq!(report.status, RunStatus::CompletedWithFailures);
    }

    #[test]
    fn test_declared_codes_not_matching_is_acceptable_failure() {
        let host = MemoryHost::new();
        host.script_command("flaky", 3);

        let report = run(&host, vec![exec("flaky").accepting([0, 1]), exec("next")]);

        assert_eq!(
            statuses(&report),
            vec![OutcomeStatus::Failed, OutcomeStatus::Converged]
        );
        assert_eq!(report.status, RunStatus::CompletedWithFailures);
    }

    #[test]
    fn test_guard_error_on_non_destructive_resource_applies() {
        let host = MemoryHost::new();
        host.make_unavailable("/srv/app");

        let report = run(&host, vec![dir("/srv/app", None, None), exec("next")]);

        let outcome = &report.outcomes()[0];
        assert_eq!(outcome.status, OutcomeStatus::Converged);
        assert!(
            outcome
                .detail
                .as_deref()
                .unwrap()
                .contains("cannot determine state of directory[/srv/app]")
        );
        assert_eq!(report.status, RunStatus::CompletedClean);
    }

    #[test]
    fn test_guard_error_on_destructive_resource_aborts() {
        let host = MemoryHost::new();
        host.make_unavailable("/var/opt/work");

        let report = run(
            &host,
            vec![delete_dir("/var/opt/work").ignoring_failure(), exec("next")],
        );

        assert_eq!(
            statuses(&report),
            vec![OutcomeStatus::Failed, OutcomeStatus::Skipped]
        );
        assert_eq!(report.status, RunStatus::Aborted);
    }

    #[test]
    fn test_notifications_run_once_after_pass() {
        let host = MemoryHost::new();
        host.set_service("nginx", ServiceState::Running);
        let nginx = Reference::Qualified(ResourceRef::new(ResourceKind::Service, "nginx"));

        let report = run(
            &host,
            vec![
                Resource::new("nginx", Properties::Service(ServiceAttrs::default())),
                exec("write-site-a").notifying(nginx.clone()),
                exec("write-site-b").notifying(nginx),
                exec("last"),
            ],
        );

        assert_eq!(host.service_calls(), vec!["restart nginx".to_string()]);

        let outcomes = report.outcomes();
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes[0].status, OutcomeStatus::Unchanged);
        assert_eq!(outcomes[3].resource.identifier, "last");

        let notified = &outcomes[4];
        assert_eq!(notified.resource.identifier, "nginx");
        assert_eq!(notified.status, OutcomeStatus::Converged);
        assert_eq!(
            notified.trigger,
            Trigger::Notification {
                from: ResourceRef::new(ResourceKind::Execute, "write-site-a")
            }
        );
    }

    #[test]
    fn test_unchanged_resources_do_not_notify() {
        let host = MemoryHost::new();
        host.add_dir("/srv/app", "root", "root", 0o755);
        let report = run(
            &host,
            vec![
                dir("/srv/app", None, None).notifying(Reference::Bare("reload".into())),
                exec("reload"),
            ],
        );

        assert_eq!(report.outcomes().len(), 2);
        assert_eq!(host.commands_run().len(), 1);
    }

    #[test]
    fn test_dry_run_never_acts() {
        let host = MemoryHost::new();
        let report = run_with(
            &host,
            [web_stack(), vec![exec("make")]].concat(),
            RunOptions { dry_run: true },
        );

        assert!(report.dry_run);
        assert_eq!(statuses(&report), vec![OutcomeStatus::Skipped; 4]);
        assert_eq!(
            report.outcomes()[0].detail.as_deref(),
            Some(DRY_RUN_DETAIL)
        );
        assert!(host.group_info("web").is_none());
        assert!(host.metadata("/srv/app").is_none());
        assert!(host.commands_run().is_empty());
        assert_eq!(report.status, RunStatus::CompletedClean);
    }

    #[test]
    fn test_cancelled_before_start() {
        let host = MemoryHost::new();
        let env = EnvironmentMapping::new();
        let ctx = host.context(&env);
        let graph = ResourceGraph::from_resources(web_stack()).unwrap();
        let token = CancelToken::new();
        token.cancel();

        let report = Converger::new(&ctx)
            .with_cancel_token(token)
            .run(&graph, &mut NoProgress);

        assert!(report.cancelled);
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(statuses(&report), vec![OutcomeStatus::Skipped; 3]);
    }

    /// Cancels the run once the given number of resources completed
    struct CancelAfter {
        token: CancelToken,
        remaining: usize,
        started: Vec<String>,
    }

    impl ProgressCallback for CancelAfter {
        fn on_resource_start(&mut self, resource: &Resource) {
            self.started.push(resource.to_string());
        }

        fn on_resource_complete(&mut self, _outcome: &ExecutionOutcome) {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancellation_skips_the_rest() {
        let host = MemoryHost::new();
        let env = EnvironmentMapping::new();
        let ctx = host.context(&env);
        let graph =
            ResourceGraph::from_resources(vec![exec("one"), exec("two"), exec("three")]).unwrap();
        let token = CancelToken::new();
        let mut progress = CancelAfter {
            token: token.clone(),
            remaining: 1,
            started: Vec::new(),
        };

        let report = Converger::new(&ctx)
            .with_cancel_token(token)
            .run(&graph, &mut progress);

        assert_eq!(progress.started, vec!["execute[one]".to_string()]);
        assert_eq!(
            statuses(&report),
            vec![
                OutcomeStatus::Converged,
                OutcomeStatus::Skipped,
                OutcomeStatus::Skipped,
            ]
        );
        assert!(report.cancelled);
        assert_eq!(report.status, RunStatus::Aborted);
    }

    #[test]
    fn test_execute_with_sentinel_is_idempotent() {
        let host = MemoryHost::new();
        host.create_on_run("./configure && make", "/opt/src/python/python");
        let build = || {
            vec![Resource::new(
                "build python",
                Properties::Execute(ExecuteAttrs {
                    creates: Some("/opt/src/python/python".into()),
                    ..ExecuteAttrs::command("./configure && make")
                }),
            )]
        };

        assert_eq!(statuses(&run(&host, build())), vec![OutcomeStatus::Converged]);
        assert_eq!(statuses(&run(&host, build())), vec![OutcomeStatus::Unchanged]);
        assert_eq!(host.commands_run().len(), 1);
    }

    fn service(name: &str, action: ServiceAction) -> Resource {
        Resource::new(
            name,
            Properties::Service(ServiceAttrs {
                action,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_existing_package_and_group_are_unchanged() {
        let host = MemoryHost::new();
        host.add_package("git", "1:2.34");
        host.add_group("web", 1001);

        let report = run(
            &host,
            vec![
                Resource::new(
                    "git",
                    Properties::Package(PackageAttrs {
                        version: Some("1:2.34".into()),
                        ..Default::default()
                    }),
                ),
                Resource::new("web", Properties::Group(GroupAttrs { gid: Some(1001) })),
            ],
        );

        assert_eq!(statuses(&report), vec![OutcomeStatus::Unchanged; 2]);
        assert_eq!(host.group_info("web").map(|g| g.gid), Some(1001));
    }

    #[test]
    fn test_service_start_then_stop_are_idempotent() {
        let host = MemoryHost::new();
        host.set_service("memcached", ServiceState::Stopped);

        let start = || vec![service("memcached", ServiceAction::Start)];
        assert_eq!(statuses(&run(&host, start())), vec![OutcomeStatus::Converged]);
        assert_eq!(statuses(&run(&host, start())), vec![OutcomeStatus::Unchanged]);

        let stop = || vec![service("memcached", ServiceAction::Stop)];
        assert_eq!(statuses(&run(&host, stop())), vec![OutcomeStatus::Converged]);
        assert_eq!(statuses(&run(&host, stop())), vec![OutcomeStatus::Unchanged]);

        assert_eq!(
            host.service_calls(),
            vec!["start memcached".to_string(), "stop memcached".to_string()]
        );
    }

    #[test]
    fn test_stop_accepts_declared_already_stopped_code() {
        let host = MemoryHost::new();
        host.set_service("memcached", ServiceState::Unknown);
        host.script_service("stop memcached", 1);

        let report = run(
            &host,
            vec![
                service("memcached", ServiceAction::Stop).accepting([0, 1]),
                exec("after"),
            ],
        );
        assert_eq!(statuses(&report), vec![OutcomeStatus::Converged; 2]);
        assert_eq!(report.outcomes()[0].exit_code, Some(1));
        assert_eq!(report.status, RunStatus::CompletedClean);

        host.set_service("memcached", ServiceState::Unknown);
        let strict = run(&host, vec![service("memcached", ServiceAction::Stop), exec("after")]);
        assert_eq!(
            statuses(&strict),
            vec![OutcomeStatus::Failed, OutcomeStatus::Skipped]
        );
        assert_eq!(strict.status, RunStatus::Aborted);
    }

    #[test]
    fn test_git_checkout_is_idempotent() {
        const REPO: &str = "https://example.com/bizarro.git";
        let host = MemoryHost::new();
        host.set_remote(REPO, "v1.0", "1111111111111111111111111111111111111111");
        let checkout = || {
            vec![Resource::new(
                "/var/opt/bizarro",
                Properties::Git(GitAttrs {
                    repository: REPO.into(),
                    reference: "v1.0".into(),
                    user: None,
                }),
            )]
        };

        assert_eq!(statuses(&run(&host, checkout())), vec![OutcomeStatus::Converged]);
        assert_eq!(statuses(&run(&host, checkout())), vec![OutcomeStatus::Unchanged]);

        host.set_remote(REPO, "v1.0", "2222222222222222222222222222222222222222");
        assert_eq!(statuses(&run(&host, checkout())), vec![OutcomeStatus::Converged]);
    }

    #[test]
    fn test_export_is_idempotent() {
        let host = MemoryHost::new();
        let export = || {
            vec![Resource::new(
                "bizarro",
                Properties::Export(ExportAttrs {
                    format: UnitFormat::Systemd,
                    target_dir: Some("/etc/systemd/system".into()),
                    cwd: Some("/var/opt/bizarro".into()),
                    env: [("RACK_ENV".to_string(), "production".to_string())].into(),
                    ..Default::default()
                }),
            )]
        };

        assert_eq!(statuses(&run(&host, export())), vec![OutcomeStatus::Converged]);
        let unit = host.contents("/etc/systemd/system/bizarro.target").unwrap();
        assert!(String::from_utf8_lossy(&unit).contains("RACK_ENV=production"));

        assert_eq!(statuses(&run(&host, export())), vec![OutcomeStatus::Unchanged]);

        host.add_file("/etc/systemd/system/bizarro.target", b"edited by hand\n");
        assert_eq!(statuses(&run(&host, export())), vec![OutcomeStatus::Converged]);
    }

    /// Cancels the run as soon as a resource starts, as a signal would
    struct CancelOnStart(CancelToken);

    impl ProgressCallback for CancelOnStart {
        fn on_resource_start(&mut self, _resource: &Resource) {
            self.0.cancel();
        }

        fn on_resource_complete(&mut self, _outcome: &ExecutionOutcome) {}
    }

    #[test]
    fn test_failure_of_interrupted_resource_is_cancellation() {
        let host = MemoryHost::new();
        host.script_command("long build", 130);
        let env = EnvironmentMapping::new();
        let ctx = host.context(&env);
        let graph =
            ResourceGraph::from_resources(vec![exec("long build"), exec("after")]).unwrap();
        let token = CancelToken::new();

        let report = Converger::new(&ctx)
            .with_cancel_token(token.clone())
            .run(&graph, &mut CancelOnStart(token));

        assert_eq!(
            statuses(&report),
            vec![OutcomeStatus::Failed, OutcomeStatus::Skipped]
        );
        assert_eq!(
            report.outcomes()[1].detail.as_deref(),
            Some("not run: cancelled")
        );
        assert!(report.cancelled);
        assert_eq!(report.status, RunStatus::Aborted);
    }
}
