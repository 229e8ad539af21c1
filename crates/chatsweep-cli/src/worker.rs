// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use chatsweep_api::ChatListing;
use chatsweep_app::{AuditEntry, Chat, UserId};
use chatsweep_db::Gateway;
use std::time::Duration;
use tracing::{error, info, warn};

/// Opens a fresh database connection at the start of every cycle.
pub trait Connector {
    fn connect(&mut self) -> Result<Box<dyn Gateway>>;
}

/// The remote chat service as the worker sees it.
pub trait ChatApi {
    fn list_eligible_chats(&mut self, user: UserId) -> Result<ChatListing>;
    fn close_chat(&mut self, chat: &Chat) -> Result<()>;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// After each chat whose insert and close were both attempted.
    pub chat_delay: Duration,
    /// After each completed cycle.
    pub cycle_interval: Duration,
    /// After a cycle that failed to connect or fetch users.
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub users_seen: usize,
    pub users_skipped: usize,
    pub listing_failures: usize,
    pub chats_found: usize,
    pub chats_logged: usize,
    pub chats_closed: usize,
    pub insert_failures: usize,
    pub close_failures: usize,
}

impl CycleReport {
    fn log(&self) {
        info!(
            users = self.users_seen,
            users_skipped = self.users_skipped,
            listing_failures = self.listing_failures,
            chats_found = self.chats_found,
            chats_logged = self.chats_logged,
            chats_closed = self.chats_closed,
            insert_failures = self.insert_failures,
            close_failures = self.close_failures,
            "cycle complete: processed {} chats",
            self.chats_logged
        );
    }
}

pub struct Worker<C, A, S> {
    connector: C,
    api: A,
    sleeper: S,
    pacing: Pacing,
}

impl<C: Connector, A: ChatApi, S: Sleeper> Worker<C, A, S> {
    pub fn new(connector: C, api: A, sleeper: S, pacing: Pacing) -> Self {
        Self {
            connector,
            api,
            sleeper,
            pacing,
        }
    }

    /// Runs cycles until `limit` is reached, forever when `None`. Each cycle
    /// is followed by the cycle interval, or by the retry backoff when it
    /// could not connect or fetch users.
    pub fn run(&mut self, limit: Option<u64>) {
        let mut cycles = 0_u64;
        loop {
            cycles += 1;
            info!(cycle = cycles, "starting cycle");
            match self.run_cycle() {
                Ok(report) => {
                    report.log();
                    self.sleeper.sleep(self.pacing.cycle_interval);
                }
                Err(cycle_error) => {
                    error!(
                        error = %format!("{cycle_error:#}"),
                        backoff_secs = self.pacing.retry_backoff.as_secs(),
                        "cycle aborted; retrying after backoff"
                    );
                    self.sleeper.sleep(self.pacing.retry_backoff);
                }
            }
            if limit.is_some_and(|limit| cycles >= limit) {
                return;
            }
        }
    }

    /// One connect, fetch, process, disconnect pass. Errors only when the
    /// connection or the user query fails; everything else is absorbed into
    /// the report.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut gateway = self.connector.connect().context("connect to database")?;
        let users = match gateway.fetch_eligible_users() {
            Ok(users) => users,
            Err(fetch_error) => {
                release(gateway);
                return Err(fetch_error).context("fetch eligible users");
            }
        };
        info!(count = users.len(), "processing users");

        let mut report = CycleReport::default();
        for raw in users {
            report.users_seen += 1;
            let user = match UserId::parse(&raw) {
                Ok(user) => user,
                Err(parse_error) => {
                    warn!(raw = %raw, error = %parse_error, "skipping user");
                    report.users_skipped += 1;
                    continue;
                }
            };
            self.process_user(gateway.as_mut(), user, &mut report);
        }

        release(gateway);
        Ok(report)
    }

    fn process_user(
        &mut self,
        gateway: &mut dyn Gateway,
        user: UserId,
        report: &mut CycleReport,
    ) {
        let listing = match self.api.list_eligible_chats(user) {
            Ok(listing) => listing,
            Err(listing_error) => {
                error!(
                    user_id = %user,
                    error = %format!("{listing_error:#}"),
                    "listing chats failed; moving to next user"
                );
                report.listing_failures += 1;
                return;
            }
        };
        info!(user_id = %user, count = listing.chats.len(), "chats due for closing");
        report.chats_found += listing.chats.len();

        for chat in &listing.chats {
            self.process_chat(gateway, user, chat, report);
        }
    }

    fn process_chat(
        &mut self,
        gateway: &mut dyn Gateway,
        user: UserId,
        chat: &Chat,
        report: &mut CycleReport,
    ) {
        let entry = AuditEntry::for_chat(chat, user);
        if let Err(insert_error) = gateway.insert_audit_log(&entry) {
            error!(
                chat_id = %chat.id,
                error = %format!("{insert_error:#}"),
                "audit insert failed; not closing chat"
            );
            report.insert_failures += 1;
            return;
        }
        report.chats_logged += 1;

        match self.api.close_chat(chat) {
            Ok(()) => report.chats_closed += 1,
            Err(close_error) => {
                warn!(
                    chat_id = %chat.id,
                    error = %format!("{close_error:#}"),
                    "close request failed; audit row kept, moving on"
                );
                report.close_failures += 1;
            }
        }
        self.sleeper.sleep(self.pacing.chat_delay);
    }
}

fn release(gateway: Box<dyn Gateway>) {
    let backend = gateway.backend();
    match gateway.close() {
        Ok(()) => info!(backend = backend.as_str(), "database connection closed"),
        Err(close_error) => warn!(error = %close_error, "closing database connection failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatApi, Connector, CycleReport, Pacing, Sleeper, Worker};
    use anyhow::{Result, bail};
    use chatsweep_api::{ChatListing, Termination};
    use chatsweep_app::{AuditEntry, Chat, ChatId, Parsed, UserId, parse_timestamp};
    use chatsweep_db::{Backend, Gateway, Schema, SqliteGateway};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Connect,
        List(i64),
        Insert(i64),
        Close(i64),
        Sleep(Duration),
    }

    type Journal = Rc<RefCell<Vec<Event>>>;

    const PACING: Pacing = Pacing {
        chat_delay: Duration::from_secs(1),
        cycle_interval: Duration::from_secs(30),
        retry_backoff: Duration::from_secs(300),
    };

    struct SqliteConnector {
        path: PathBuf,
        failures_left: usize,
        journal: Journal,
    }

    impl Connector for SqliteConnector {
        fn connect(&mut self) -> Result<Box<dyn Gateway>> {
            self.journal.borrow_mut().push(Event::Connect);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                bail!("connection refused");
            }
            Ok(Box::new(RecordingGateway {
                inner: SqliteGateway::open(&self.path, Schema::default())?,
                journal: Rc::clone(&self.journal),
            }))
        }
    }

    /// Journals each successful insert so ordering against close is visible.
    struct RecordingGateway {
        inner: SqliteGateway,
        journal: Journal,
    }

    impl Gateway for RecordingGateway {
        fn backend(&self) -> Backend {
            self.inner.backend()
        }

        fn fetch_eligible_users(&mut self) -> Result<Vec<String>> {
            self.inner.fetch_eligible_users()
        }

        fn insert_audit_log(&mut self, entry: &AuditEntry) -> Result<()> {
            self.inner.insert_audit_log(entry)?;
            self.journal
                .borrow_mut()
                .push(Event::Insert(entry.chat_id.get()));
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<()> {
            Box::new(self.inner).close()
        }
    }

    #[derive(Default)]
    struct FakeApi {
        chats: HashMap<i64, Vec<Chat>>,
        failing_listings: Vec<i64>,
        failing_closes: Vec<i64>,
        journal: Journal,
    }

    impl ChatApi for FakeApi {
        fn list_eligible_chats(&mut self, user: UserId) -> Result<ChatListing> {
            self.journal.borrow_mut().push(Event::List(user.get()));
            if self.failing_listings.contains(&user.get()) {
                bail!("request failed with status 502");
            }
            let chats = self.chats.get(&user.get()).cloned().unwrap_or_default();
            Ok(ChatListing {
                chats,
                pages: 2,
                skipped: 0,
                termination: Termination::EmptyPage { page: 1 },
            })
        }

        fn close_chat(&mut self, chat: &Chat) -> Result<()> {
            self.journal.borrow_mut().push(Event::Close(chat.id.get()));
            if self.failing_closes.contains(&chat.id.get()) {
                bail!("request failed with status 500");
            }
            Ok(())
        }
    }

    struct RecordingSleeper {
        journal: Journal,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.journal.borrow_mut().push(Event::Sleep(duration));
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        journal: Journal,
    }

    impl Fixture {
        fn new(users: &[&str]) -> Result<Self> {
            let (dir, path) = chatsweep_testkit::temp_db_path()?;
            let seed = SqliteGateway::create(&path, Schema::default())?;
            for user in users {
                seed.insert_user(user, "vendedor")?;
            }
            seed.insert_user("999", "gerente")?;
            Ok(Self {
                _dir: dir,
                path,
                journal: Journal::default(),
            })
        }

        fn worker(
            &self,
            api: FakeApi,
            connect_failures: usize,
        ) -> Worker<SqliteConnector, FakeApi, RecordingSleeper> {
            Worker::new(
                SqliteConnector {
                    path: self.path.clone(),
                    failures_left: connect_failures,
                    journal: Rc::clone(&self.journal),
                },
                FakeApi {
                    journal: Rc::clone(&self.journal),
                    ..api
                },
                RecordingSleeper {
                    journal: Rc::clone(&self.journal),
                },
                PACING,
            )
        }

        fn audit_rows(&self) -> Result<Vec<AuditEntry>> {
            SqliteGateway::open(&self.path, Schema::default())?.audit_entries()
        }

        fn events(&self) -> Vec<Event> {
            self.journal.borrow().clone()
        }
    }

    fn chat(id: i64, sent_at: &str, tabulation: Parsed<i64>) -> Chat {
        Chat {
            id: ChatId::new(id),
            last_message_raw: sent_at.to_owned(),
            last_message: parse_timestamp(Some(sent_at)),
            tabulation,
        }
    }

    #[test]
    #[traced_test]
    fn unparseable_user_ids_are_skipped_with_one_notice() -> Result<()> {
        let fixture = Fixture::new(&["12", "abc", "34"])?;
        let mut worker = fixture.worker(FakeApi::default(), 0);

        let report = worker.run_cycle()?;

        assert_eq!(report.users_seen, 3);
        assert_eq!(report.users_skipped, 1);
        assert_eq!(
            fixture.events(),
            vec![Event::Connect, Event::List(12), Event::List(34)]
        );
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("skipping user")).count() {
                1 => Ok(()),
                count => Err(format!("expected one skip notice, saw {count}")),
            }
        });
        Ok(())
    }

    #[test]
    fn due_chat_is_logged_then_closed_then_paced() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        let mut api = FakeApi::default();
        api.chats
            .insert(12, vec![chat(9001, "2026-10-14 12:00:00", Parsed::Value(417))]);
        let mut worker = fixture.worker(api, 0);

        let report = worker.run_cycle()?;

        assert_eq!(
            report,
            CycleReport {
                users_seen: 1,
                chats_found: 1,
                chats_logged: 1,
                chats_closed: 1,
                ..CycleReport::default()
            }
        );
        assert_eq!(
            fixture.events(),
            vec![
                Event::Connect,
                Event::List(12),
                Event::Insert(9001),
                Event::Close(9001),
                Event::Sleep(PACING.chat_delay),
            ]
        );
        let rows = fixture.audit_rows()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chat_id, ChatId::new(9001));
        assert_eq!(rows[0].user_id, UserId::new(12));
        assert_eq!(rows[0].tabulation_id, 417);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn close_failure_keeps_audit_row_and_continues() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        let mut api = FakeApi {
            failing_closes: vec![1],
            ..FakeApi::default()
        };
        api.chats.insert(
            12,
            vec![
                chat(1, "2026-10-10 08:00:00", Parsed::Value(5)),
                chat(2, "2026-10-11 08:00:00", Parsed::Value(6)),
            ],
        );
        let mut worker = fixture.worker(api, 0);

        let report = worker.run_cycle()?;

        assert_eq!(report.chats_logged, 2);
        assert_eq!(report.chats_closed, 1);
        assert_eq!(report.close_failures, 1);
        assert_eq!(fixture.audit_rows()?.len(), 2);
        assert_eq!(
            fixture.events(),
            vec![
                Event::Connect,
                Event::List(12),
                Event::Insert(1),
                Event::Close(1),
                Event::Sleep(PACING.chat_delay),
                Event::Insert(2),
                Event::Close(2),
                Event::Sleep(PACING.chat_delay),
            ]
        );
        assert!(logs_contain("close request failed; audit row kept"));
        Ok(())
    }

    #[test]
    fn insert_failure_skips_close_and_pacing() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        let mut api = FakeApi::default();
        api.chats.insert(
            12,
            vec![
                chat(0, "2026-10-10 08:00:00", Parsed::Value(5)),
                chat(3, "2026-10-10 08:00:00", Parsed::Value(5)),
            ],
        );
        let mut worker = fixture.worker(api, 0);

        let report = worker.run_cycle()?;

        assert_eq!(report.insert_failures, 1);
        assert_eq!(report.chats_logged, 1);
        assert_eq!(
            fixture.events(),
            vec![
                Event::Connect,
                Event::List(12),
                Event::Insert(3),
                Event::Close(3),
                Event::Sleep(PACING.chat_delay),
            ]
        );
        Ok(())
    }

    #[test]
    fn listing_failure_skips_only_that_user() -> Result<()> {
        let fixture = Fixture::new(&["12", "34"])?;
        let mut api = FakeApi {
            failing_listings: vec![12],
            ..FakeApi::default()
        };
        api.chats
            .insert(34, vec![chat(77, "2026-10-01 00:00:00", Parsed::Value(9))]);
        let mut worker = fixture.worker(api, 0);

        let report = worker.run_cycle()?;

        assert_eq!(report.listing_failures, 1);
        assert_eq!(report.chats_closed, 1);
        let rows = fixture.audit_rows()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, UserId::new(34));
        Ok(())
    }

    #[test]
    fn defaulted_tabulation_is_logged_as_zero() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        let mut api = FakeApi::default();
        api.chats.insert(
            12,
            vec![chat(
                5,
                "2026-10-10 08:00:00",
                chatsweep_app::parse_tabulation(Some("n/a")),
            )],
        );
        let mut worker = fixture.worker(api, 0);

        let report = worker.run_cycle()?;

        assert_eq!(report.chats_closed, 1);
        assert_eq!(fixture.audit_rows()?[0].tabulation_id, 0);
        Ok(())
    }

    #[test]
    fn connect_failure_backs_off_then_retries_from_scratch() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        let mut api = FakeApi::default();
        api.chats
            .insert(12, vec![chat(40, "2026-10-01 00:00:00", Parsed::Value(1))]);
        let mut worker = fixture.worker(api, 1);

        worker.run(Some(2));

        assert_eq!(
            fixture.events(),
            vec![
                Event::Connect,
                Event::Sleep(PACING.retry_backoff),
                Event::Connect,
                Event::List(12),
                Event::Insert(40),
                Event::Close(40),
                Event::Sleep(PACING.chat_delay),
                Event::Sleep(PACING.cycle_interval),
            ]
        );
        assert_eq!(fixture.audit_rows()?.len(), 1);
        Ok(())
    }

    #[test]
    fn fetch_failure_aborts_the_cycle() -> Result<()> {
        let fixture = Fixture::new(&["12"])?;
        SqliteGateway::open(&fixture.path, Schema::default())?
            .raw_connection()
            .execute_batch("INSERT INTO usuarios (userid, cargo) VALUES (NULL, 'vendedor');")?;
        let mut worker = fixture.worker(FakeApi::default(), 0);

        let error = worker.run_cycle().expect_err("unreadable user row should abort");

        assert!(format!("{error:#}").contains("fetch eligible users"));
        assert_eq!(fixture.events(), vec![Event::Connect]);
        Ok(())
    }

    #[test]
    fn run_sleeps_cycle_interval_between_successful_cycles() -> Result<()> {
        let fixture = Fixture::new(&[])?;
        let mut worker = fixture.worker(FakeApi::default(), 0);

        worker.run(Some(2));

        assert_eq!(
            fixture.events(),
            vec![
                Event::Connect,
                Event::Sleep(PACING.cycle_interval),
                Event::Connect,
                Event::Sleep(PACING.cycle_interval),
            ]
        );
        Ok(())
    }
}
