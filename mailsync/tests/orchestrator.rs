use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use mailsync::{
    account::{Account, AccountId, HostAuth},
    callback::{StatusEvent, SyncStatus},
    mailbox::{
        Attachment, AttachmentId, Mailbox, MailboxId, MailboxKind, MessageId, PartRequest,
        SyncInterval,
    },
    service::{Capabilities, SyncService},
    store::MemoryStore,
    worker::{
        self, StartOutcome, SyncWorker, ValidationResult, ValidationStatus, WorkerContext,
        WorkerFactory,
    },
    AnyResult, SyncOrchestrator,
};
use tokio::{sync::Semaphore, time};

#[derive(Default)]
struct Stats {
    builds: AtomicUsize,
    syncs: AtomicUsize,
    parts: AtomicUsize,
    folder_lists: AtomicUsize,
}

struct FakeWorker {
    stats: Arc<Stats>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl SyncWorker for FakeWorker {
    async fn sync(&mut self, ctx: &WorkerContext) -> worker::Result<()> {
        let mut stop = ctx.stop.clone();

        tokio::select! {
            permit = self.gate.acquire() => permit.unwrap().forget(),
            _ = stop.requested() => return Err(worker::Error::transient("aborted")),
        }

        ctx.progress(100);
        self.stats.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_part(&mut self, _ctx: &WorkerContext, _req: &PartRequest) -> worker::Result<()> {
        self.stats.parts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFactory {
    stats: Arc<Stats>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl WorkerFactory for FakeFactory {
    fn build(&self, _: &Account, _: &Mailbox) -> AnyResult<Box<dyn SyncWorker>> {
        self.stats.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeWorker {
            stats: self.stats.clone(),
            gate: self.gate.clone(),
        }))
    }

    async fn validate(&self, host_auth: &HostAuth) -> ValidationResult {
        if host_auth.credential.is_some() {
            ValidationResult::success()
        } else {
            ValidationResult::failure(ValidationStatus::AuthenticationFailed, "missing credential")
        }
    }

    async fn load_folder_list(&self, _: &Account) -> AnyResult<()> {
        self.stats.folder_lists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn account(id: u64) -> Account {
    Account {
        id: AccountId(id),
        display_name: format!("account {id}"),
        email: format!("user{id}@localhost"),
        sync_interval: SyncInterval::Never,
        host_auth: Some(HostAuth {
            protocol: "imap2".into(),
            host: "localhost".into(),
            port: 993,
            login: format!("user{id}"),
            credential: Some(format!("secret-{id}")),
            ssl: true,
        }),
    }
}

fn mailbox(id: u64, account_id: u64, kind: MailboxKind, sync_interval: SyncInterval) -> Mailbox {
    Mailbox {
        id: MailboxId(id),
        account_id: AccountId(account_id),
        display_name: format!("{kind:?}"),
        server_id: format!("{kind:?}"),
        kind,
        sync_interval,
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    stats: Arc<Stats>,
    gate: Arc<Semaphore>,
    orchestrator: Arc<SyncOrchestrator>,
}

/// Account 1 owns the inbox 10 and the sent folder 11, account 2 owns
/// the inbox 20. No mailbox syncs automatically.
fn fixture(permits: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(account(1));
    store.insert_account(account(2));
    store.insert_mailbox(mailbox(10, 1, MailboxKind::Inbox, SyncInterval::Never));
    store.insert_mailbox(mailbox(11, 1, MailboxKind::Sent, SyncInterval::Never));
    store.insert_mailbox(mailbox(20, 2, MailboxKind::Inbox, SyncInterval::Never));

    let stats = Arc::new(Stats::default());
    let gate = Arc::new(Semaphore::new(permits));
    let factory = FakeFactory {
        stats: stats.clone(),
        gate: gate.clone(),
    };

    let orchestrator =
        SyncOrchestrator::builder(store.clone(), store.clone(), Arc::new(factory)).build();

    Fixture {
        store,
        stats,
        gate,
        orchestrator,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[test_log::test(tokio::test)]
async fn held_mailbox_rejects_automatic_start_only() {
    let f = fixture(100);
    let orch = &f.orchestrator;

    orch.errors()
        .record_failure(MailboxId(10), false, Duration::from_secs(60));

    let outcome = orch.start_sync(MailboxId(10), false).await.unwrap();
    assert_eq!(outcome, StartOutcome::Rejected);
    assert_eq!(f.stats.builds.load(Ordering::SeqCst), 0);
    assert!(orch.supervisor().is_empty());

    let outcome = orch.start_sync(MailboxId(10), true).await.unwrap();
    assert_eq!(outcome, StartOutcome::Spawned);
    assert_eq!(f.stats.builds.load(Ordering::SeqCst), 1);

    // a successful pass forgets the failure
    wait_until(|| orch.supervisor().is_empty()).await;
    assert!(orch.errors().get(MailboxId(10)).is_none());
}

#[test_log::test(tokio::test)]
async fn second_start_wakes_instead_of_spawning() {
    let f = fixture(0);
    let orch = &f.orchestrator;

    let first = orch.start_sync(MailboxId(10), true).await.unwrap();
    let second = orch.start_sync(MailboxId(10), true).await.unwrap();

    assert_eq!(first, StartOutcome::Spawned);
    assert_eq!(second, StartOutcome::Woken);
    assert_eq!(f.stats.builds.load(Ordering::SeqCst), 1);

    f.gate.add_permits(2);
    wait_until(|| orch.supervisor().is_empty()).await;
    assert_eq!(f.stats.syncs.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_starts_keep_one_worker() {
    let f = fixture(0);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let orch = f.orchestrator.clone();
            tokio::spawn(async move { orch.start_sync(MailboxId(10), true).await.unwrap() })
        })
        .collect();

    let mut spawned = 0;
    for task in tasks {
        let outcome = task.await.unwrap();
        assert!(outcome.is_running());
        if outcome == StartOutcome::Spawned {
            spawned += 1;
        }
    }

    assert_eq!(spawned, 1);
    assert_eq!(f.orchestrator.supervisor().len(), 1);

    f.gate.add_permits(16);
    f.orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn fatal_failure_needs_host_change() {
    let f = fixture(100);
    let orch = &f.orchestrator;

    orch.errors().record_failure(MailboxId(10), true, Duration::ZERO);
    orch.errors().record_failure(MailboxId(20), true, Duration::ZERO);

    let far_future = Utc::now() + chrono::Duration::days(365);
    assert!(!orch.errors().is_eligible(MailboxId(10), far_future));

    let outcome = orch.start_sync(MailboxId(10), false).await.unwrap();
    assert_eq!(outcome, StartOutcome::Rejected);

    orch.host_changed(AccountId(1)).await.unwrap();

    assert!(orch.errors().is_eligible(MailboxId(10), Utc::now()));
    assert!(!orch.errors().is_eligible(MailboxId(20), far_future));
    assert!(orch.errors().get(MailboxId(20)).unwrap().fatal);

    let outcome = orch.start_sync(MailboxId(10), false).await.unwrap();
    assert_eq!(outcome, StartOutcome::Spawned);
}

#[test_log::test(tokio::test)]
async fn host_change_stops_account_workers_and_prunes_missing() {
    let f = fixture(0);
    let orch = &f.orchestrator;

    orch.start_sync(MailboxId(10), true).await.unwrap();
    orch.start_sync(MailboxId(11), true).await.unwrap();
    orch.start_sync(MailboxId(20), true).await.unwrap();
    assert_eq!(orch.supervisor().len(), 3);

    orch.errors()
        .record_failure(MailboxId(99), false, Duration::from_secs(60));

    orch.host_changed(AccountId(1)).await.unwrap();

    assert!(orch.errors().get(MailboxId(99)).is_none());
    wait_until(|| orch.supervisor().running() == vec![MailboxId(20)]).await;
    assert!(orch.kicker().is_pending());

    // aborted passes are not failures
    assert!(orch.errors().is_empty());

    f.gate.add_permits(1);
    wait_until(|| orch.supervisor().is_empty()).await;
}

#[test_log::test(tokio::test)]
async fn host_change_restarts_periodic_mailbox() {
    let f = fixture(0);
    f.store
        .insert_mailbox(mailbox(12, 1, MailboxKind::Mail, SyncInterval::Every(3600)));

    f.orchestrator.start().await.unwrap();
    assert!(f.orchestrator.supervisor().is_running(MailboxId(12)));
    assert_eq!(f.stats.builds.load(Ordering::SeqCst), 1);

    // the pass is still blocked when the credentials change
    f.orchestrator.host_changed(AccountId(1)).await.unwrap();

    wait_until(|| f.stats.builds.load(Ordering::SeqCst) == 2).await;
    wait_until(|| f.orchestrator.supervisor().is_running(MailboxId(12))).await;
    assert!(f.orchestrator.errors().is_empty());

    f.gate.add_permits(1);
    wait_until(|| f.stats.syncs.load(Ordering::SeqCst) == 1).await;

    f.orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn start_reconciles_and_spawns_automatic_mailboxes() {
    let f = fixture(100);
    f.store
        .insert_mailbox(mailbox(12, 1, MailboxKind::Mail, SyncInterval::Every(3600)));
    f.store
        .insert_mailbox(mailbox(21, 2, MailboxKind::Mail, SyncInterval::Push));

    f.orchestrator.start().await.unwrap();

    assert_eq!(f.store.reconciliations(), 1);
    assert_eq!(f.orchestrator.registry().len(), 2);

    let mut running = f.orchestrator.supervisor().running();
    running.sort();
    assert_eq!(running, vec![MailboxId(12), MailboxId(21)]);

    // periodic workers stay alive after their first pass
    wait_until(|| f.stats.syncs.load(Ordering::SeqCst) == 2).await;
    assert_eq!(f.orchestrator.supervisor().len(), 2);

    f.orchestrator.shutdown().await;
    assert!(f.orchestrator.supervisor().is_empty());
}

#[test_log::test(tokio::test)]
async fn start_fails_when_store_unreachable() {
    let f = fixture(100);
    f.store.set_unreachable(true);

    let err = f.orchestrator.start().await.unwrap_err();

    assert!(err.is_store_unreachable());
    assert_eq!(f.store.reconciliations(), 0);
    assert!(f.orchestrator.registry().is_empty());
}

#[test_log::test(tokio::test)]
async fn kick_spawns_new_automatic_mailboxes() {
    let f = fixture(100);
    f.orchestrator.start().await.unwrap();
    assert!(f.orchestrator.supervisor().is_empty());

    f.store
        .insert_mailbox(mailbox(13, 1, MailboxKind::Mail, SyncInterval::Every(3600)));
    f.orchestrator.kick();

    wait_until(|| f.orchestrator.supervisor().is_running(MailboxId(13))).await;

    f.orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn new_account_gets_inbox_and_folder_list() {
    let f = fixture(100);
    f.orchestrator.start().await.unwrap();

    f.store.insert_account(account(3));
    let inbox = f
        .orchestrator
        .account_added(AccountId(3))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(inbox.kind, MailboxKind::Inbox);
    assert_eq!(inbox.account_id, AccountId(3));
    assert_eq!(f.stats.folder_lists.load(Ordering::SeqCst), 1);
    assert!(f
        .orchestrator
        .registry()
        .account_selector()
        .matches(AccountId(3)));

    f.orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn accounts_changed_refreshes_selector() {
    let f = fixture(100);
    f.orchestrator.start().await.unwrap();
    let before = f.orchestrator.registry().account_selector();

    assert!(!f.orchestrator.accounts_changed().await.unwrap());

    f.store.insert_account(account(4));
    assert!(f.orchestrator.accounts_changed().await.unwrap());

    let after = f.orchestrator.registry().account_selector();
    assert!(!before.matches(AccountId(4)));
    assert!(after.matches(AccountId(4)));

    f.orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn load_attachment_reaches_owning_worker() {
    let f = fixture(100);
    let orch = &f.orchestrator;
    let (_, mut events) = orch.subscribe();

    f.store.insert_attachment(Attachment {
        id: AttachmentId(7),
        message_id: MessageId(70),
        mailbox_id: MailboxId(11),
        file_name: "report.pdf".into(),
    });

    orch.load_attachment(AttachmentId(7), false).await.unwrap();
    wait_until(|| f.stats.parts.load(Ordering::SeqCst) == 1).await;

    orch.load_attachment(AttachmentId(8), true).await.unwrap();

    let mut attachment_statuses = Vec::new();
    wait_until(|| {
        while let Ok(event) = events.try_recv() {
            if let StatusEvent::Attachment {
                attachment_id,
                status,
                ..
            } = event
            {
                attachment_statuses.push((attachment_id, status));
            }
        }
        attachment_statuses.len() == 2
    })
    .await;

    assert!(attachment_statuses.contains(&(AttachmentId(7), SyncStatus::Succeeded)));
    assert!(attachment_statuses.contains(&(AttachmentId(8), SyncStatus::NotFound)));
}

#[test_log::test(tokio::test)]
async fn observers_see_sync_lifecycle() {
    let f = fixture(100);
    let orch = &f.orchestrator;
    let (_, mut events) = orch.subscribe();

    orch.start_sync(MailboxId(20), true).await.unwrap();

    let mut statuses = Vec::new();
    wait_until(|| {
        while let Ok(event) = events.try_recv() {
            statuses.push(event.status().clone());
        }
        statuses.last() == Some(&SyncStatus::Stopped)
    })
    .await;

    assert_eq!(
        statuses,
        vec![
            SyncStatus::Started,
            SyncStatus::Progress { percent: 100 },
            SyncStatus::Succeeded,
            SyncStatus::Stopped,
        ]
    );
}

#[test_log::test(tokio::test)]
async fn unsupported_commands_are_distinct() {
    let f = fixture(100);
    let service: Arc<dyn SyncService> = f.orchestrator.clone();

    let err = service.send_mail(AccountId(1)).await.unwrap_err();
    assert!(err.is_not_supported());

    let err = service
        .search_messages(AccountId(1), "invoice", MailboxId(10))
        .await
        .unwrap_err();
    assert!(err.is_not_supported());

    let err = service.auto_discover("user", "pass").await.unwrap_err();
    assert!(err.is_not_supported());

    assert_eq!(service.protocol(), "imap2");
    assert_eq!(
        service.get_capabilities(AccountId(1)),
        Capabilities::SYNCABLE_FOLDERS | Capabilities::FOLDER_SERVER_SEARCH | Capabilities::UNDO
    );
}

#[test_log::test(tokio::test)]
async fn validate_uses_throwaway_worker() {
    let f = fixture(100);

    let mut host_auth = account(1).host_auth.unwrap();
    assert!(f.orchestrator.validate(&host_auth).await.is_success());

    host_auth.credential = None;
    let result = f.orchestrator.validate(&host_auth).await;
    assert_eq!(result.status, ValidationStatus::AuthenticationFailed);

    assert!(f.orchestrator.supervisor().is_empty());
    assert_eq!(f.stats.builds.load(Ordering::SeqCst), 0);
}
