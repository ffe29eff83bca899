//! The engine's public operations.
//!
//! [`HeistService`] is cheap to clone and safe to share across threads. Each
//! started session gets its own worker thread that waits out the join window
//! and then executes the heist. Persistence and notification failures never
//! abort an operation; they are logged and the in-memory state wins.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::book::{ConfigBook, ThemeBook};
use crate::catalog::TargetCatalog;
use crate::config::{offset_by, Config, ConfigUpdate, EngineSettings};
use crate::error::{HeistError, LedgerError, Result};
use crate::lock;
use crate::member::{MemberStats, MemberStatus};
use crate::outcome::{self, HeistResult, Outcome};
use crate::ports::{Ledger, MemberDirectory, NotificationSink};
use crate::registry::SessionRegistry;
use crate::render::{render_results, render_status, StatusAction, StatusView};
use crate::session::{Phase, Session, SessionHandle, SessionSnapshot, WaitOutcome};
use crate::storage::Store;
use crate::target::Target;
use crate::theme::{self, Theme};
use crate::tracker::MemberTracker;
use crate::vault::VaultRecovery;

/// Collaborators wired into the service.
pub struct ServiceParts {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<dyn Ledger>,
    pub directory: Arc<dyn MemberDirectory>,
    pub sink: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub session: SessionHandle,
    pub deadline: DateTime<Utc>,
    pub cost: i64,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    pub session: SessionHandle,
    pub crew_size: usize,
    pub cost: i64,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BailoutOutcome {
    pub member_id: String,
    pub payer_id: String,
    pub cost: i64,
}

/// How a session's execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionReport {
    /// Nobody joined the initiator.
    CalledOff,
    NoEligibleTarget { crew_size: usize },
    Resolved { result: HeistResult },
    /// Reset while waiting or executing; nothing was applied.
    Abandoned,
}

#[derive(Clone)]
pub struct HeistService {
    engine: Arc<Engine>,
}

struct Engine {
    settings: EngineSettings,
    ledger: Arc<dyn Ledger>,
    directory: Arc<dyn MemberDirectory>,
    sink: Arc<dyn NotificationSink>,
    registry: SessionRegistry,
    members: MemberTracker,
    targets: Arc<TargetCatalog>,
    configs: ConfigBook,
    themes: ThemeBook,
    rng: Mutex<StdRng>,
}

impl HeistService {
    pub fn new(settings: EngineSettings, parts: ServiceParts) -> Self {
        let rng = match settings.outcome.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let engine = Engine {
            registry: SessionRegistry::new(),
            members: MemberTracker::new(Arc::clone(&parts.store)),
            targets: Arc::new(TargetCatalog::new(Arc::clone(&parts.store))),
            configs: ConfigBook::new(Arc::clone(&parts.store), settings.defaults.theme.clone()),
            themes: ThemeBook::new(Arc::clone(&parts.store)),
            ledger: parts.ledger,
            directory: parts.directory,
            sink: parts.sink,
            rng: Mutex::new(rng),
            settings,
        };
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.engine.settings
    }

    /// Loads every stored target into the catalog. Returns the count.
    pub fn load_targets(&self) -> usize {
        self.engine.targets.load_all()
    }

    pub fn spawn_vault_recovery(&self) -> io::Result<VaultRecovery> {
        VaultRecovery::spawn(
            Arc::clone(&self.engine.targets),
            self.engine.settings.vault.clone(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_event(&self, community_id: &str, initiator_id: &str) -> Result<StartOutcome> {
        let engine = &self.engine;
        if engine.registry.get(community_id).is_some() {
            return Err(HeistError::AlreadyInProgress);
        }

        let now = Utc::now();
        let config = engine.configs.get(community_id);
        let theme = engine.theme_for(&config);
        let notice = engine.admit(&config, &theme, initiator_id, now)?;

        let deadline = offset_by(now, config.wait_time);
        let session = engine
            .registry
            .create(community_id, initiator_id, now, deadline)?;
        if let Err(err) = engine.charge(community_id, initiator_id, config.heist_cost) {
            session.terminate();
            engine.registry.remove(&session);
            return Err(err);
        }

        tracing::info!(
            community = %community_id,
            member = %initiator_id,
            session_id = session.handle().session_id,
            "Heist planning started"
        );
        engine.post_status(&session, &config, &theme, StatusAction::Plan);

        let worker = Arc::clone(engine);
        let worker_session = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name(format!("heist-{community_id}"))
            .spawn(move || {
                let report = worker.run_session(&worker_session);
                tracing::info!(
                    community = %worker_session.community_id(),
                    session_id = worker_session.handle().session_id,
                    report = report_kind(&report),
                    "Heist session finished"
                );
            });
        if let Err(err) = spawned {
            tracing::warn!(community = %community_id, error = %err, "Failed to spawn heist worker");
            session.terminate();
            engine.registry.remove(&session);
            engine.refund(community_id, initiator_id, config.heist_cost);
            return Err(HeistError::Unavailable(err.to_string()));
        }

        Ok(StartOutcome {
            session: session.handle().clone(),
            deadline,
            cost: config.heist_cost,
            notice,
        })
    }

    pub fn join_event(&self, community_id: &str, member_id: &str) -> Result<JoinOutcome> {
        let engine = &self.engine;
        let session = engine
            .registry
            .get(community_id)
            .ok_or(HeistError::NoActiveEvent)?;
        if session.is_terminated() || session.phase() != Phase::Planning {
            return Err(HeistError::EventAlreadyStarted);
        }
        if session.is_member(member_id) {
            return Err(HeistError::AlreadyMember);
        }

        let now = Utc::now();
        let config = engine.configs.get(community_id);
        let theme = engine.theme_for(&config);
        let notice = engine.admit(&config, &theme, member_id, now)?;

        let crew_size = session.join(member_id)?;
        if let Err(err) = engine.charge(community_id, member_id, config.heist_cost) {
            session.leave(member_id);
            return Err(err);
        }

        tracing::debug!(
            community = %community_id,
            member = %member_id,
            crew_size,
            "Member joined heist"
        );
        engine.post_status(&session, &config, &theme, StatusAction::Join);

        Ok(JoinOutcome {
            session: session.handle().clone(),
            crew_size,
            cost: config.heist_cost,
            notice,
        })
    }

    /// Cancels the community's session, if any. Returns whether one existed.
    pub fn reset_event(&self, community_id: &str) -> bool {
        let engine = &self.engine;
        let Some(session) = engine.registry.delete(community_id) else {
            return false;
        };
        session.terminate();
        tracing::info!(
            community = %community_id,
            session_id = session.handle().session_id,
            "Heist reset"
        );
        let config = engine.configs.get(community_id);
        let theme = engine.theme_for(&config);
        engine.post_status(&session, &config, &theme, StatusAction::Cancel);
        true
    }

    pub fn session(&self, community_id: &str) -> Option<SessionSnapshot> {
        self.engine
            .registry
            .get(community_id)
            .map(|session| session.snapshot())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Members
    // ─────────────────────────────────────────────────────────────────────

    pub fn member_stats(&self, community_id: &str, member_id: &str) -> MemberStats {
        self.engine
            .members
            .get(community_id, member_id)
            .stats(Utc::now())
    }

    pub fn balance(&self, community_id: &str, member_id: &str) -> i64 {
        self.engine.balance(community_id, member_id)
    }

    /// Pays a jailed member's bail from `payer_id`'s account. The member
    /// defaults to the payer.
    pub fn bailout(
        &self,
        community_id: &str,
        payer_id: &str,
        member_id: Option<&str>,
    ) -> Result<BailoutOutcome> {
        let engine = &self.engine;
        let member_id = member_id.unwrap_or(payer_id);
        let now = Utc::now();

        let record = engine.members.get(community_id, member_id);
        if record.status != MemberStatus::Apprehended {
            return Err(HeistError::NotJailed(
                engine.directory.display_name(community_id, member_id),
            ));
        }
        if record.remaining_sentence(now).is_none() {
            engine
                .members
                .modify(community_id, member_id, |record| record.bail_out(now))?;
            return Err(HeistError::SentenceServed);
        }

        let cost = record.bail_cost;
        let available = engine.balance(community_id, payer_id);
        if available < cost {
            return Err(HeistError::InsufficientFunds {
                required: cost,
                available,
            });
        }
        engine.charge(community_id, payer_id, cost)?;

        match engine
            .members
            .modify(community_id, member_id, |record| record.bail_out(now))
        {
            Ok(_) => {
                tracing::info!(
                    community = %community_id,
                    member = %member_id,
                    payer = %payer_id,
                    cost,
                    "Member bailed out"
                );
                Ok(BailoutOutcome {
                    member_id: member_id.to_string(),
                    payer_id: payer_id.to_string(),
                    cost,
                })
            }
            Err(err) => {
                engine.refund(community_id, payer_id, cost);
                Err(err)
            }
        }
    }

    pub fn revive(&self, community_id: &str, member_id: &str) -> Result<MemberStats> {
        let now = Utc::now();
        self.engine
            .members
            .modify(community_id, member_id, |record| {
                record.revive(now)?;
                Ok(record.stats(now))
            })
    }

    pub fn clear_member(&self, community_id: &str, member_id: &str) -> MemberStats {
        let now = Utc::now();
        tracing::info!(community = %community_id, member = %member_id, "Member cleared");
        self.engine
            .members
            .modify(community_id, member_id, |record| {
                record.clear();
                record.stats(now)
            })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Targets
    // ─────────────────────────────────────────────────────────────────────

    pub fn list_targets(&self, community_id: &str) -> Vec<Target> {
        self.engine.targets.list(community_id)
    }

    pub fn upsert_target(&self, target: Target) -> Result<Target> {
        self.engine.targets.upsert(target.clone())?;
        tracing::info!(
            community = %target.community_id,
            target = %target.target_id,
            "Target saved"
        );
        Ok(target)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration and themes
    // ─────────────────────────────────────────────────────────────────────

    pub fn config(&self, community_id: &str) -> Config {
        self.engine.configs.get(community_id)
    }

    pub fn update_config(&self, community_id: &str, update: &ConfigUpdate) -> Result<Config> {
        self.engine.configs.modify(community_id, |config| {
            config.apply_update(update)?;
            Ok(config.clone())
        })
    }

    pub fn list_themes(&self, community_id: &str) -> Vec<String> {
        self.engine.themes.names(community_id)
    }

    pub fn set_theme(&self, community_id: &str, theme_id: &str) -> Result<Config> {
        self.engine.themes.resolve(community_id, theme_id)?;
        self.engine.configs.modify(community_id, |config| {
            config.theme = theme_id.to_string();
            Ok(config.clone())
        })
    }

    pub fn add_theme(&self, community_id: &str, theme: Theme) -> Result<()> {
        self.engine.themes.add(community_id, theme)
    }
}

fn report_kind(report: &ExecutionReport) -> &'static str {
    match report {
        ExecutionReport::CalledOff => "called_off",
        ExecutionReport::NoEligibleTarget { .. } => "no_eligible_target",
        ExecutionReport::Resolved { .. } => "resolved",
        ExecutionReport::Abandoned => "abandoned",
    }
}

impl Engine {
    fn run_session(&self, session: &Arc<Session>) -> ExecutionReport {
        let poll = self.settings.session.poll_interval();
        let waited = session.wait_for_deadline(poll, |session| {
            let config = self.configs.get(session.community_id());
            let theme = self.theme_for(&config);
            self.post_status(session, &config, &theme, StatusAction::Update);
        });
        if waited == WaitOutcome::Terminated {
            return ExecutionReport::Abandoned;
        }

        let report = self.execute(session);
        self.registry.remove(session);
        report
    }

    fn execute(&self, session: &Session) -> ExecutionReport {
        let Ok(crew) = session.begin_execution() else {
            return ExecutionReport::Abandoned;
        };
        let community_id = session.community_id();
        let config = self.configs.get(community_id);
        let theme = self.theme_for(&config);
        self.post_status(session, &config, &theme, StatusAction::Start);

        if crew.len() <= 1 {
            self.post_message(
                session,
                &format!(
                    "You tried to rally a {}, but no one wanted to follow you. The {} has been cancelled.",
                    theme.crew, theme.heist
                ),
            );
            self.finish(session, &config, &theme);
            return ExecutionReport::CalledOff;
        }

        let Some(target) = self.targets.select(community_id, crew.len()) else {
            let err = HeistError::NoEligibleTarget {
                crew_size: crew.len(),
            };
            tracing::debug!(community = %community_id, error = %err, "Heist has no target");
            self.post_message(session, &err.to_string());
            self.finish(session, &config, &theme);
            return ExecutionReport::NoEligibleTarget {
                crew_size: crew.len(),
            };
        };

        self.post_message(
            session,
            &format!(
                "Get ready! The {} is starting with {} members.",
                theme.heist,
                crew.len()
            ),
        );
        self.post_message(
            session,
            &format!("The {} has decided to hit **{}**.", theme.crew, target.target_id),
        );

        let result = {
            let mut rng = lock(&self.rng);
            outcome::resolve(
                &mut *rng,
                &crew,
                &target,
                &theme,
                self.settings.outcome.haul_range(),
            )
        };
        if session.is_terminated() {
            return self.abandon(session);
        }

        let now = Utc::now();
        for member in &result.members {
            let name = self.directory.display_name(community_id, &member.member_id);
            self.post_message(session, &Theme::narrate(&member.message, &name));
            if session.is_terminated() {
                return self.abandon(session);
            }
            self.members
                .modify(community_id, &member.member_id, |record| match member.outcome {
                    Outcome::Escaped => record.escape(),
                    Outcome::Apprehended => record.apprehend(&config, now),
                    Outcome::Dead => record.kill(&config, now),
                });
            let payout = member.total();
            if payout > 0 {
                if let Err(err) = self.ledger.deposit(community_id, &member.member_id, payout) {
                    tracing::warn!(
                        community = %community_id,
                        member = %member.member_id,
                        amount = payout,
                        error = %err,
                        "Failed to pay out heist share"
                    );
                }
            }
        }

        if session.is_terminated() {
            return self.abandon(session);
        }
        if result.haul > 0 {
            if let Err(err) = self.targets.apply_theft(
                community_id,
                &target.target_id,
                result.haul,
                self.settings.vault.floor_percent,
            ) {
                tracing::warn!(
                    community = %community_id,
                    target = %target.target_id,
                    error = %err,
                    "Failed to withdraw haul from vault"
                );
            }
        }

        if session.is_terminated() {
            return self.abandon(session);
        }
        if let Err(err) = self.configs.modify(community_id, |config| {
            config.raise_alert(now);
            Ok(())
        }) {
            tracing::warn!(community = %community_id, error = %err, "Failed to raise police alert");
        }

        let table = render_results(&result, |member_id| {
            self.directory.display_name(community_id, member_id)
        });
        if let Err(err) = self.sink.post_final(session.handle(), &table) {
            tracing::warn!(community = %community_id, error = %err, "Failed to post heist results");
        }
        self.finish(session, &config, &theme);

        tracing::info!(
            community = %community_id,
            target = %target.target_id,
            escaped = result.count(Outcome::Escaped),
            apprehended = result.count(Outcome::Apprehended),
            dead = result.count(Outcome::Dead),
            haul = result.haul,
            "Heist resolved"
        );
        ExecutionReport::Resolved { result }
    }

    /// Reset won the race: stop before touching anything else.
    fn abandon(&self, session: &Session) -> ExecutionReport {
        tracing::info!(
            community = %session.community_id(),
            session_id = session.handle().session_id,
            "Heist reset during execution; remaining effects skipped"
        );
        ExecutionReport::Abandoned
    }

    fn finish(&self, session: &Session, config: &Config, theme: &Theme) {
        session.complete();
        self.post_status(session, config, theme, StatusAction::End);
    }

    /// Police alert, member eligibility and funds. Returns the member's
    /// one-time notice, if any.
    fn admit(
        &self,
        config: &Config,
        theme: &Theme,
        member_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let community_id = config.community_id.as_str();
        if let Some(remaining) = config.alert_remaining(now) {
            return Err(HeistError::PoliceAlert { remaining });
        }
        let eligibility = self
            .members
            .modify(community_id, member_id, |record| {
                record.check_eligibility(theme, now)
            })
            .map_err(|err| {
                tracing::debug!(community = %community_id, member = %member_id, error = %err, "Member ineligible");
                err
            })?;

        let available = self.balance(community_id, member_id);
        if available < config.heist_cost {
            return Err(HeistError::InsufficientFunds {
                required: config.heist_cost,
                available,
            });
        }
        Ok(eligibility.notice)
    }

    fn balance(&self, community_id: &str, member_id: &str) -> i64 {
        self.ledger
            .balance(community_id, member_id)
            .unwrap_or_else(|err| {
                tracing::warn!(
                    community = %community_id,
                    member = %member_id,
                    error = %err,
                    "Failed to read balance; treating as empty"
                );
                0
            })
    }

    fn charge(&self, community_id: &str, member_id: &str, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Ok(());
        }
        match self.ledger.withdraw(community_id, member_id, amount) {
            Ok(_) => Ok(()),
            Err(LedgerError::Insufficient { balance, requested }) => {
                Err(HeistError::InsufficientFunds {
                    required: requested,
                    available: balance,
                })
            }
            Err(err) => {
                tracing::warn!(
                    community = %community_id,
                    member = %member_id,
                    error = %err,
                    "Failed to withdraw from ledger"
                );
                Err(HeistError::Unavailable(err.to_string()))
            }
        }
    }

    fn refund(&self, community_id: &str, member_id: &str, amount: i64) {
        if amount <= 0 {
            return;
        }
        if let Err(err) = self.ledger.deposit(community_id, member_id, amount) {
            tracing::warn!(
                community = %community_id,
                member = %member_id,
                amount,
                error = %err,
                "Failed to refund"
            );
        }
    }

    fn theme_for(&self, config: &Config) -> Theme {
        self.themes
            .resolve(&config.community_id, &config.theme)
            .unwrap_or_else(|err| {
                tracing::warn!(
                    community = %config.community_id,
                    error = %err,
                    "Configured theme unavailable; using built-in theme"
                );
                theme::builtin().clone()
            })
    }

    fn post_status(&self, session: &Session, config: &Config, theme: &Theme, action: StatusAction) {
        let community_id = session.community_id();
        let crew: Vec<String> = session
            .crew()
            .iter()
            .map(|member_id| self.directory.display_name(community_id, member_id))
            .collect();
        let initiator = self
            .directory
            .display_name(community_id, session.initiator_id());
        let view = StatusView {
            theme,
            config,
            initiator: &initiator,
            crew: &crew,
            deadline: session.deadline(),
        };
        let text = render_status(&view, action, Utc::now());
        if let Err(err) = self.sink.post_status(session.handle(), &text) {
            tracing::warn!(community = %community_id, error = %err, "Failed to post heist status");
        }
    }

    fn post_message(&self, session: &Session, text: &str) {
        if let Err(err) = self.sink.post_message(session.handle(), text) {
            tracing::warn!(
                community = %session.community_id(),
                error = %err,
                "Failed to post heist message"
            );
        }
    }
}
