//! The export run: for every code, discover its tickets and export each one,
//! recovering the browser session when it dies and checkpointing progress.
//!
//! Per code: `Pending -> Discovering -> Exporting -> Done`. Discovery
//! problems end the code as failed-but-done with a whole-code failure
//! record. Ticket failures are recorded and skipped. A lost session is
//! replaced and the same code or ticket is tried again.

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::discovery::{self, DiscoveryLimits};
use crate::export::{self, Artifact, ExportConfig, ExportError};
use crate::records::{InventoryStatus, RecordError, ResultSink, RunSummary};
use crate::remote::{self, ClientLookup, RemoteError, RemoteSession, SessionFactory};
use crate::retry::RetryConfig;
use crate::state::{CheckpointState, CheckpointStore};
use crate::types::{AssessorCode, DelayRange, TicketId};

pub const NO_CLIENT: &str = "no client found";
pub const PROFILE_UNAVAILABLE: &str = "cannot open client profile";

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Save the checkpoint after this many exported tickets.
    pub checkpoint_every: usize,
    /// Session replacements allowed for one code's discovery or one ticket.
    pub max_session_recoveries: u32,
    pub between_tickets: DelayRange,
    pub failure_delay: Duration,
    /// Retries and pause for opening a browser session.
    pub session_retry: RetryConfig,
    pub no_progress_bar: bool,
    /// On an interactive terminal, wait for Enter before closing the browser.
    pub keep_browser_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub exported: usize,
    pub reused: usize,
    pub failed_tickets: usize,
    pub failed_codes: usize,
    pub skipped_codes: usize,
    pub session_recoveries: usize,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed { summary: RunSummary, stats: RunStats },
    Interrupted { stats: RunStats },
}

/// Create a progress bar with a consistent template.
///
/// Hidden when disabled or when stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Hold the browser only after a completed pass, never after an error or
/// an interrupt.
fn should_hold_browser(
    keep_browser_open: bool,
    result: &anyhow::Result<RunOutcome>,
    interactive: bool,
) -> bool {
    keep_browser_open && interactive && matches!(result, Ok(RunOutcome::Completed { .. }))
}

fn wait_for_enter() {
    tokio::task::block_in_place(|| {
        println!("Press Enter to close the browser...");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    });
}

/// Result of trying to list one code's tickets.
enum Listing {
    Tickets(Vec<TicketId>),
    Failed(String),
}

enum CodeFlow {
    /// All discovered tickets were attempted; carries how many were discovered.
    Done(usize),
    Interrupted,
}

pub struct Orchestrator<'a> {
    factory: &'a dyn SessionFactory,
    credentials: &'a Credentials,
    store: CheckpointStore,
    sink: ResultSink,
    limits: DiscoveryLimits,
    export: ExportConfig,
    config: RunConfig,
    shutdown: CancellationToken,
    state: CheckpointState,
    session: Option<Box<dyn RemoteSession>>,
    since_flush: usize,
    stats: RunStats,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: &'a dyn SessionFactory,
        credentials: &'a Credentials,
        store: CheckpointStore,
        state: CheckpointState,
        sink: ResultSink,
        limits: DiscoveryLimits,
        export: ExportConfig,
        config: RunConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            factory,
            credentials,
            store,
            sink,
            limits,
            export,
            config,
            shutdown,
            state,
            session: None,
            since_flush: 0,
            stats: RunStats::default(),
        }
    }

    /// Process every code in order.
    ///
    /// Errors are fatal (no session could be opened, the checkpoint cannot
    /// be written). The checkpoint is saved before returning in every case.
    pub async fn run(mut self, codes: &[AssessorCode]) -> anyhow::Result<RunOutcome> {
        let result = self.run_codes(codes).await;
        if let Some(mut session) = self.session.take() {
            if should_hold_browser(
                self.config.keep_browser_open,
                &result,
                std::io::stdin().is_terminal(),
            ) {
                wait_for_enter();
            }
            session.close().await;
        }
        if result.is_err() {
            if let Err(e) = self.store.save(&self.state).await {
                tracing::error!("Failed to save checkpoint after fatal error: {}", e);
            }
        }
        result
    }

    async fn run_codes(&mut self, codes: &[AssessorCode]) -> anyhow::Result<RunOutcome> {
        let mut expected = 0usize;
        for (index, code) in codes.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                return self.interrupted().await;
            }
            if self.state.is_code_done(code) {
                tracing::debug!(code = %code, "Already done, skipping");
                self.stats.skipped_codes += 1;
                continue;
            }
            tracing::info!(code = %code, "Processing code {}/{}", index + 1, codes.len());
            match self.process_code(code).await? {
                CodeFlow::Done(discovered) => expected += discovered,
                CodeFlow::Interrupted => return self.interrupted().await,
            }
        }

        self.save_checkpoint().await?;
        let summary = RunSummary::now(codes.len(), expected);
        note(self.sink.write_summary(&summary));
        Ok(RunOutcome::Completed {
            summary,
            stats: self.stats.clone(),
        })
    }

    async fn interrupted(&mut self) -> anyhow::Result<RunOutcome> {
        tracing::info!("Shutdown requested, saving progress");
        self.save_checkpoint().await?;
        Ok(RunOutcome::Interrupted {
            stats: self.stats.clone(),
        })
    }

    async fn save_checkpoint(&mut self) -> anyhow::Result<()> {
        self.store
            .save(&self.state)
            .await
            .context("Cannot persist progress")?;
        self.since_flush = 0;
        Ok(())
    }

    /// Take the current session, opening a new one if there is none.
    async fn take_session(&mut self) -> anyhow::Result<Box<dyn RemoteSession>> {
        if let Some(mut session) = self.session.take() {
            if session.is_alive().await {
                return Ok(session);
            }
            tracing::warn!("Browser session is gone, opening a new one");
            self.discard_session(session).await;
        }
        remote::open_session(self.factory, self.credentials, &self.config.session_retry)
            .await
            .context("Failed to open a logged-in browser session")
    }

    async fn discard_session(&mut self, mut session: Box<dyn RemoteSession>) {
        session.close().await;
        self.stats.session_recoveries += 1;
    }

    async fn mark_code_failed(&mut self, code: &AssessorCode, reason: &str) -> anyhow::Result<()> {
        tracing::warn!(code = %code, "Code failed: {}", reason);
        note(self.sink.record_failure(code, None, reason));
        self.stats.failed_codes += 1;
        self.state.mark_code_done(code.clone());
        self.save_checkpoint().await
    }

    async fn list_tickets(&mut self, code: &AssessorCode) -> anyhow::Result<Listing> {
        let mut losses = 0u32;
        loop {
            let mut session = self.take_session().await?;
            let attempt = open_and_discover(session.as_mut(), code, &self.limits, &self.export).await;
            match attempt {
                Ok(listing) => {
                    self.session = Some(session);
                    return Ok(listing);
                }
                Err(e) if e.is_session_lost() => {
                    self.discard_session(session).await;
                    losses += 1;
                    if losses > self.config.max_session_recoveries {
                        return Ok(Listing::Failed(e.to_string()));
                    }
                    tracing::warn!(code = %code, "Session lost during discovery, reconnecting ({}/{})", losses, self.config.max_session_recoveries);
                }
                Err(e) => {
                    self.session = Some(session);
                    return Ok(Listing::Failed(e.to_string()));
                }
            }
        }
    }

    async fn process_code(&mut self, code: &AssessorCode) -> anyhow::Result<CodeFlow> {
        let ids = match self.list_tickets(code).await? {
            Listing::Tickets(ids) => ids,
            Listing::Failed(reason) => {
                self.mark_code_failed(code, &reason).await?;
                return Ok(CodeFlow::Done(0));
            }
        };
        let discovered = ids.len();
        let pending: Vec<TicketId> = ids
            .into_iter()
            .filter(|id| !self.state.is_processed(*id))
            .collect();
        tracing::info!(code = %code, discovered, pending = pending.len(), "Tickets discovered");

        let pb = create_progress_bar(self.config.no_progress_bar, pending.len() as u64);
        pb.set_message(code.to_string());

        let mut index = 0;
        let mut losses = 0u32;
        while index < pending.len() {
            if self.shutdown.is_cancelled() {
                pb.finish_and_clear();
                return Ok(CodeFlow::Interrupted);
            }
            let id = pending[index];
            let mut session = self.take_session().await?;
            let result = export::export(session.as_mut(), &self.export, code, id).await;

            match result {
                Ok(artifact) => {
                    self.session = Some(session);
                    self.on_exported(code, id, &artifact, &pb).await?;
                    index += 1;
                    losses = 0;
                    pb.inc(1);
                    if !artifact.reused {
                        self.pause(self.config.between_tickets).await;
                    }
                }
                Err(e) if e.is_session_lost() => {
                    self.discard_session(session).await;
                    losses += 1;
                    if losses > self.config.max_session_recoveries {
                        self.on_failed(code, id, &e, &pb);
                        index += 1;
                        losses = 0;
                        pb.inc(1);
                    } else {
                        pb.suspend(|| {
                            tracing::warn!(code = %code, ticket = id.get(), "Session lost, reconnecting ({}/{})", losses, self.config.max_session_recoveries)
                        });
                    }
                }
                Err(e) => {
                    self.session = Some(session);
                    self.on_failed(code, id, &e, &pb);
                    index += 1;
                    pb.inc(1);
                    tokio::time::sleep(self.config.failure_delay).await;
                }
            }
        }
        pb.finish_and_clear();

        self.state.mark_code_done(code.clone());
        self.save_checkpoint().await?;
        tracing::info!(code = %code, "Code done");
        Ok(CodeFlow::Done(discovered))
    }

    async fn on_exported(
        &mut self,
        code: &AssessorCode,
        id: TicketId,
        artifact: &Artifact,
        pb: &ProgressBar,
    ) -> anyhow::Result<()> {
        let status = if artifact.reused {
            self.stats.reused += 1;
            InventoryStatus::AlreadyPresent
        } else {
            self.stats.exported += 1;
            InventoryStatus::Exported
        };
        pb.suspend(|| tracing::debug!(code = %code, ticket = id.get(), "Saved {}", artifact.path.display()));
        self.state.mark_processed(id);
        note(self.sink.record_success(code, id, artifact));
        note(self.sink.record_inventory(code, id, &artifact.path, Some(artifact.size), status));

        self.since_flush += 1;
        if self.since_flush >= self.config.checkpoint_every {
            self.save_checkpoint().await?;
        }
        Ok(())
    }

    fn on_failed(&mut self, code: &AssessorCode, id: TicketId, error: &ExportError, pb: &ProgressBar) {
        pb.suspend(|| tracing::error!(code = %code, ticket = id.get(), "Export failed: {}", error));
        self.stats.failed_tickets += 1;
        let path = export::artifact_path(&self.export.output_dir, code, id);
        note(self.sink.record_failure(code, Some(id), &error.to_string()));
        note(self.sink.record_inventory(code, id, &path, None, InventoryStatus::Failed));
    }

    /// Sleep for a sampled delay, cut short by shutdown.
    async fn pause(&self, delay: DelayRange) {
        tokio::select! {
            _ = delay.sleep() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Open the code's listing and walk it.
async fn open_and_discover(
    session: &mut dyn RemoteSession,
    code: &AssessorCode,
    limits: &DiscoveryLimits,
    export: &ExportConfig,
) -> Result<Listing, RemoteError> {
    match session.open_client(code).await? {
        ClientLookup::NotFound => Ok(Listing::Failed(NO_CLIENT.to_string())),
        ClientLookup::ProfileUnavailable => Ok(Listing::Failed(PROFILE_UNAVAILABLE.to_string())),
        ClientLookup::Opened => {
            let ids = discovery::discover(session, limits, &export.wait).await?;
            Ok(Listing::Tickets(ids))
        }
    }
}

/// Result streams are best-effort; a failed write must not stop the run.
fn note(result: Result<(), RecordError>) {
    if let Err(e) = result {
        tracing::warn!("Failed to write record: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FailureRecord, WHOLE_CODE};
    use crate::remote::fake::{FakeBackend, FakeClient, FakeFactory};
    use crate::remote::Endpoints;
    use crate::wait::WaitConfig;
    use std::path::{Path, PathBuf};
    use url::Url;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("zendesk_export_orchestrator_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn quick_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn export_config(dir: &Path) -> ExportConfig {
        ExportConfig {
            output_dir: dir.to_path_buf(),
            endpoints: Endpoints::with_base(Url::parse("https://acme.zendesk.com/").unwrap()),
            after_print: DelayRange::zero(),
            wait: WaitConfig {
                page_change: Duration::from_millis(20),
                document_ready: Duration::from_millis(20),
                poll: Duration::from_millis(5),
            },
            nav_retry: quick_retry(0),
        }
    }

    fn run_config() -> RunConfig {
        RunConfig {
            checkpoint_every: 10,
            max_session_recoveries: 3,
            between_tickets: DelayRange::zero(),
            failure_delay: Duration::ZERO,
            session_retry: quick_retry(2),
            no_progress_bar: true,
            keep_browser_open: false,
        }
    }

    fn codes(raw: &[&str]) -> Vec<AssessorCode> {
        raw.iter().map(|c| AssessorCode::new(c)).collect()
    }

    fn tid(id: u64) -> TicketId {
        TicketId::new(id).unwrap()
    }

    struct Harness {
        dir: PathBuf,
        backend: FakeBackend,
        config: RunConfig,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn new(name: &str) -> Self {
            Self {
                dir: test_dir(name),
                backend: FakeBackend::new(),
                config: run_config(),
                shutdown: CancellationToken::new(),
            }
        }

        fn store(&self) -> CheckpointStore {
            CheckpointStore::in_dir(&self.dir)
        }

        fn sink(&self) -> ResultSink {
            ResultSink::new(&self.dir)
        }

        async fn run(&self, codes: &[AssessorCode]) -> anyhow::Result<RunOutcome> {
            let factory = FakeFactory::new(self.backend.clone());
            let credentials = Credentials::new("agent@acme.com", "pw");
            let state = self.store().load(false).await.unwrap();
            let orchestrator = Orchestrator::new(
                &factory,
                &credentials,
                self.store(),
                state,
                self.sink(),
                DiscoveryLimits::default(),
                export_config(&self.dir),
                self.config.clone(),
                self.shutdown.clone(),
            );
            orchestrator.run(codes).await
        }

        async fn state(&self) -> CheckpointState {
            self.store().load(false).await.unwrap()
        }

        fn failures(&self) -> Vec<FailureRecord> {
            self.sink().failures().unwrap()
        }

        fn rendered(&self) -> Vec<u64> {
            self.backend.with(|b| b.rendered.clone())
        }
    }

    #[tokio::test]
    async fn test_fresh_run_with_missing_client() {
        let h = Harness::new("fresh_run");
        h.backend.add_listing("A100", vec![vec![103, 101, 102]]);
        let outcome = h.run(&codes(&["A100", "B200"])).await.unwrap();

        let RunOutcome::Completed { summary, stats } = outcome else {
            panic!("run was interrupted");
        };
        assert_eq!(summary.total_assessors, 2);
        assert_eq!(summary.total_expected_tickets, 3);
        assert_eq!(stats.exported, 3);

        let state = h.state().await;
        assert!(state.is_code_done(&AssessorCode::new("A100")));
        assert!(state.is_code_done(&AssessorCode::new("B200")));
        assert_eq!(state.processed_count(), 3);

        let failures = h.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].assessor, "B200");
        assert_eq!(failures[0].ticket_id, WHOLE_CODE);
        assert_eq!(failures[0].error, NO_CLIENT);
        assert_eq!(h.rendered(), vec![101, 102, 103]);
        assert!(h.sink().read_summary().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resumed_run_exports_only_new_tickets() {
        let h = Harness::new("resumed");
        let mut initial = CheckpointState::default();
        initial.mark_processed(tid(101));
        h.store().save(&initial).await.unwrap();
        h.backend.add_listing("A100", vec![vec![101, 102, 103]]);

        h.run(&codes(&["A100"])).await.unwrap();
        assert_eq!(h.rendered(), vec![102, 103]);
        let state = h.state().await;
        assert!(state.contains_all(&initial));
        assert_eq!(state.processed_count(), 3);
    }

    #[tokio::test]
    async fn test_session_invalidated_on_second_ticket() {
        let h = Harness::new("invalidated");
        h.backend.add_listing("A100", vec![vec![101, 102, 103]]);
        h.backend.with(|b| b.invalidate_on_render.insert(102, 1));

        let outcome = h.run(&codes(&["A100"])).await.unwrap();
        let RunOutcome::Completed { stats, .. } = outcome else {
            panic!("run was interrupted");
        };
        assert_eq!(stats.session_recoveries, 1);
        assert_eq!(h.rendered(), vec![101, 102, 103]);
        assert_eq!(h.backend.with(|b| b.open_calls), 2);
        assert_eq!(h.state().await.processed_count(), 3);
        assert!(h.failures().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = Harness::new("idempotent");
        h.backend.add_listing("A100", vec![vec![1, 2], vec![3]]);
        h.run(&codes(&["A100", "Z999"])).await.unwrap();

        let state = h.state().await;
        let successes = h.sink().successes().unwrap().len();
        let failures = h.failures().len();
        let opens = h.backend.with(|b| b.open_calls);

        let outcome = h.run(&codes(&["A100", "Z999"])).await.unwrap();
        let RunOutcome::Completed { stats, .. } = outcome else {
            panic!("run was interrupted");
        };
        assert_eq!(stats.skipped_codes, 2);
        assert_eq!(h.state().await, state);
        assert_eq!(h.sink().successes().unwrap().len(), successes);
        assert_eq!(h.failures().len(), failures);
        assert_eq!(h.backend.with(|b| b.open_calls), opens);
    }

    #[tokio::test]
    async fn test_ticket_failure_is_isolated() {
        let h = Harness::new("isolation");
        h.backend.add_listing("A100", vec![vec![101, 102, 103]]);
        h.backend.with(|b| b.render_failures.insert(102));

        h.run(&codes(&["A100"])).await.unwrap();
        let state = h.state().await;
        assert!(state.is_code_done(&AssessorCode::new("A100")));
        assert!(state.is_processed(tid(101)));
        assert!(!state.is_processed(tid(102)));
        assert!(state.is_processed(tid(103)));

        let failures = h.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].ticket_id, 102);
        let inventory = h.sink().inventory().unwrap();
        assert_eq!(inventory.len(), 3);
        assert_eq!(inventory[1].status, InventoryStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_client_and_unavailable_profile_are_distinct() {
        let h = Harness::new("distinct_failures");
        h.backend.add_client("P100", FakeClient::ProfileUnavailable);
        h.run(&codes(&["N100", "P100"])).await.unwrap();

        let failures = h.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].error, NO_CLIENT);
        assert_eq!(failures[1].error, PROFILE_UNAVAILABLE);
        assert!(failures.iter().all(|f| f.ticket_id == WHOLE_CODE));
        assert_eq!(h.state().await.done_count(), 2);
    }

    #[tokio::test]
    async fn test_other_discovery_error_fails_code() {
        let h = Harness::new("broken_client");
        h.backend.add_client("X100", FakeClient::Broken("search box".into()));
        h.backend.add_listing("Y100", vec![vec![5]]);
        h.run(&codes(&["X100", "Y100"])).await.unwrap();

        let failures = h.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("search box"));
        assert_eq!(h.rendered(), vec![5]);
    }

    #[tokio::test]
    async fn test_session_loss_during_discovery_retries_code() {
        let h = Harness::new("discovery_loss");
        h.backend.add_listing("A100", vec![vec![7, 8]]);
        h.backend.with(|b| b.invalidate_on_open_client = 1);

        h.run(&codes(&["A100"])).await.unwrap();
        assert_eq!(h.backend.with(|b| b.open_calls), 2);
        assert_eq!(h.rendered(), vec![7, 8]);
        assert!(h.failures().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_gives_up_after_recoveries() {
        let mut h = Harness::new("discovery_exhausted");
        h.config.max_session_recoveries = 2;
        h.backend.add_listing("A100", vec![vec![7]]);
        h.backend.add_listing("B100", vec![vec![9]]);
        h.backend.with(|b| b.invalidate_on_open_client = 3);

        h.run(&codes(&["A100", "B100"])).await.unwrap();
        let failures = h.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].assessor, "A100");
        assert_eq!(failures[0].ticket_id, WHOLE_CODE);
        assert_eq!(h.rendered(), vec![9]);
        assert_eq!(h.state().await.done_count(), 2);
    }

    #[tokio::test]
    async fn test_ticket_failed_after_repeated_session_loss() {
        let mut h = Harness::new("ticket_exhausted");
        h.config.max_session_recoveries = 2;
        h.backend.add_listing("A100", vec![vec![101, 102, 103]]);
        h.backend.with(|b| b.invalidate_on_render.insert(102, 10));

        h.run(&codes(&["A100"])).await.unwrap();
        let state = h.state().await;
        assert!(!state.is_processed(tid(102)));
        assert!(state.is_processed(tid(103)));
        let failures = h.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].ticket_id, 102);
    }

    #[tokio::test]
    async fn test_interrupt_saves_without_summary() {
        let h = Harness::new("interrupt");
        h.backend.add_listing("A100", vec![vec![1]]);
        h.shutdown.cancel();

        let outcome = h.run(&codes(&["A100"])).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Interrupted { .. }));
        assert!(h.store().path().exists());
        assert!(!h.state().await.is_code_done(&AssessorCode::new("A100")));
        assert!(h.sink().read_summary().unwrap().is_none());
        assert_eq!(h.backend.with(|b| b.open_calls), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_flushed_every_n_exports() {
        let mut h = Harness::new("batched_flush");
        h.config.checkpoint_every = 2;
        h.backend.add_listing("A100", vec![vec![1, 2, 3, 4, 5]]);
        let checkpoint = h.store().path().to_path_buf();
        h.backend.with(|b| {
            b.render_failures.insert(3);
            b.checkpoint_path = Some(checkpoint);
        });

        h.run(&codes(&["A100"])).await.unwrap();

        let snapshots = h.backend.with(|b| b.checkpoint_on_render.clone());
        let on_disk = |id: u64| -> Option<CheckpointState> {
            snapshots
                .iter()
                .find(|(rendered, _)| *rendered == id)
                .and_then(|(_, raw)| raw.as_deref())
                .map(|raw| serde_json::from_str(raw).unwrap())
        };
        assert!(on_disk(1).is_none());
        assert!(on_disk(2).is_none());

        // Tickets 1 and 2 were flushed; the failed ticket 3 does not count.
        for id in [3, 4, 5] {
            let state = on_disk(id).unwrap();
            assert!(state.is_processed(tid(1)));
            assert!(state.is_processed(tid(2)));
            assert_eq!(state.processed_count(), 2);
            assert!(!state.is_code_done(&AssessorCode::new("A100")));
        }

        let state = h.state().await;
        assert_eq!(state.processed_count(), 4);
        assert!(state.is_code_done(&AssessorCode::new("A100")));
    }

    #[test]
    fn test_browser_held_only_after_completed_run() {
        let completed = || {
            Ok(RunOutcome::Completed {
                summary: RunSummary::now(1, 1),
                stats: RunStats::default(),
            })
        };
        let interrupted = || {
            Ok(RunOutcome::Interrupted {
                stats: RunStats::default(),
            })
        };
        assert!(should_hold_browser(true, &completed(), true));
        assert!(!should_hold_browser(false, &completed(), true));
        assert!(!should_hold_browser(true, &completed(), false));
        assert!(!should_hold_browser(true, &interrupted(), true));
        assert!(!should_hold_browser(true, &Err(anyhow::anyhow!("login failed")), true));
    }

    #[tokio::test]
    async fn test_login_failure_is_fatal() {
        let h = Harness::new("login_failure");
        h.backend.add_listing("A100", vec![vec![1]]);
        h.backend.with(|b| b.reject_login = true);
        assert!(h.run(&codes(&["A100"])).await.is_err());
        assert!(h.sink().read_summary().unwrap().is_none());
    }
}
