use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConnectivityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    LocalFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityAction {
    StartAssociation,
    StopAssociation,
    StartAccessPoint,
    StopAccessPoint,
    ConnectSession,
    DisconnectSession,
    /// Publish availability and discovery, then re-subscribe command topics.
    AnnounceSession,
}

/// Doubling retry delay with a cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    current_ms: u64,
    failures: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            current_ms: base_ms,
            failures: 0,
        }
    }

    pub fn on_failure(&mut self) -> u64 {
        let delay = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
        self.failures = 0;
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub link: LinkStatus,
    pub session: SessionStatus,
    pub link_retry_interval_ms: u64,
    pub session_backoff_ms: u64,
    pub session_failures: u32,
    pub last_link_attempt_ms: Option<u64>,
    pub last_session_attempt_ms: Option<u64>,
    pub session_next_attempt_ms: Option<u64>,
    pub fallback_entered_ms: Option<u64>,
    pub association_stalled: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectivitySupervisor {
    config: ConnectivityConfig,
    credentials_present: bool,
    session_enabled: bool,

    link: LinkStatus,
    last_link_attempt_ms: Option<u64>,
    link_deadline_ms: Option<u64>,
    fallback_entered_ms: Option<u64>,
    unassociated_since_ms: Option<u64>,
    stall_reported: bool,

    session: SessionStatus,
    backoff: Backoff,
    last_session_attempt_ms: Option<u64>,
    session_next_attempt_ms: Option<u64>,
    session_deadline_ms: Option<u64>,
}

impl ConnectivitySupervisor {
    pub fn new(
        config: ConnectivityConfig,
        credentials_present: bool,
        session_enabled: bool,
    ) -> Self {
        let backoff = Backoff::new(config.session_backoff_base_ms, config.session_backoff_max_ms);
        Self {
            config,
            credentials_present,
            session_enabled,
            link: LinkStatus::Disconnected,
            last_link_attempt_ms: None,
            link_deadline_ms: None,
            fallback_entered_ms: None,
            unassociated_since_ms: None,
            stall_reported: false,
            session: SessionStatus::Disconnected,
            backoff,
            last_session_attempt_ms: None,
            session_next_attempt_ms: None,
            session_deadline_ms: None,
        }
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    pub fn session(&self) -> SessionStatus {
        self.session
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_session_connected(&self) -> bool {
        self.session == SessionStatus::Connected
    }

    pub fn poll(&mut self, now_ms: u64, link_up: bool) -> Vec<ConnectivityAction> {
        let mut actions = Vec::new();

        if self.link != LinkStatus::Connected && self.unassociated_since_ms.is_none() {
            self.unassociated_since_ms = Some(now_ms);
        }

        match self.link {
            LinkStatus::Disconnected => {
                if self.credentials_present {
                    let due = self
                        .last_link_attempt_ms
                        .map(|last| now_ms.saturating_sub(last) > self.config.reconnect_interval_ms)
                        .unwrap_or(true);
                    if due {
                        self.begin_association(now_ms, &mut actions);
                    }
                } else if self.config.local_fallback_enabled {
                    info!("no wifi credentials, starting local access point");
                    self.enter_fallback(now_ms, &mut actions);
                }
            }
            LinkStatus::Connecting => {
                if link_up {
                    info!("wifi associated");
                    self.link = LinkStatus::Connected;
                    self.link_deadline_ms = None;
                    self.unassociated_since_ms = None;
                    self.stall_reported = false;
                } else if self
                    .link_deadline_ms
                    .is_some_and(|deadline| now_ms > deadline)
                {
                    warn!(
                        "wifi association timed out after {} ms",
                        self.config.association_timeout_ms
                    );
                    actions.push(ConnectivityAction::StopAssociation);
                    self.link_deadline_ms = None;
                    if self.config.local_fallback_enabled {
                        self.enter_fallback(now_ms, &mut actions);
                    } else {
                        self.link = LinkStatus::Disconnected;
                        self.last_link_attempt_ms = Some(now_ms);
                    }
                }
            }
            LinkStatus::Connected => {
                if !link_up {
                    warn!("wifi link lost");
                    self.link = LinkStatus::Disconnected;
                    self.unassociated_since_ms = Some(now_ms);
                    self.drop_session(&mut actions);
                }
            }
            LinkStatus::LocalFallback => {
                let expired = self.fallback_entered_ms.is_some_and(|entered| {
                    now_ms.saturating_sub(entered) > self.config.fallback_timeout_ms
                });
                if expired && self.credentials_present {
                    info!("local access point timed out, retrying wifi");
                    actions.push(ConnectivityAction::StopAccessPoint);
                    self.fallback_entered_ms = None;
                    self.begin_association(now_ms, &mut actions);
                }
            }
        }

        if self.link == LinkStatus::Connected {
            self.poll_session(now_ms, &mut actions);
        }

        if self.association_stalled(now_ms) && !self.stall_reported {
            warn!(
                "no wifi association for {} ms and no local fallback configured",
                self.config.stall_alarm_ms
            );
            self.stall_reported = true;
        }

        actions
    }

    /// Stores whether station credentials exist. Fresh credentials leave any
    /// current state and start an association attempt immediately.
    pub fn credentials_changed(&mut self, present: bool, now_ms: u64) -> Vec<ConnectivityAction> {
        let mut actions = Vec::new();
        self.credentials_present = present;
        if !present {
            return actions;
        }

        match self.link {
            LinkStatus::LocalFallback => {
                actions.push(ConnectivityAction::StopAccessPoint);
                self.fallback_entered_ms = None;
            }
            LinkStatus::Connecting => actions.push(ConnectivityAction::StopAssociation),
            LinkStatus::Connected => {
                self.drop_session(&mut actions);
                actions.push(ConnectivityAction::StopAssociation);
                self.unassociated_since_ms = Some(now_ms);
            }
            LinkStatus::Disconnected => {}
        }

        self.begin_association(now_ms, &mut actions);
        actions
    }

    /// Broker settings changed. Any running session is dropped so the next
    /// poll reconnects with the new settings.
    pub fn session_settings_changed(&mut self, enabled: bool) -> Vec<ConnectivityAction> {
        let mut actions = Vec::new();
        if self.session_enabled != enabled {
            info!("broker session {}", if enabled { "enabled" } else { "disabled" });
        }
        self.session_enabled = enabled;
        self.drop_session(&mut actions);
        self.backoff.reset();
        actions
    }

    pub fn force_local_fallback(&mut self, now_ms: u64) -> Vec<ConnectivityAction> {
        let mut actions = Vec::new();
        match self.link {
            LinkStatus::LocalFallback => return actions,
            LinkStatus::Connected => {
                self.drop_session(&mut actions);
                actions.push(ConnectivityAction::StopAssociation);
                self.unassociated_since_ms = Some(now_ms);
            }
            LinkStatus::Connecting => {
                actions.push(ConnectivityAction::StopAssociation);
                self.link_deadline_ms = None;
            }
            LinkStatus::Disconnected => {}
        }
        info!("local access point forced by operator");
        self.enter_fallback(now_ms, &mut actions);
        actions
    }

    pub fn session_established(&mut self, now_ms: u64) -> Vec<ConnectivityAction> {
        if self.session != SessionStatus::Connecting || self.link != LinkStatus::Connected {
            debug!("ignoring stale session establishment at {now_ms}");
            return Vec::new();
        }
        info!("broker session established");
        self.session = SessionStatus::Connected;
        self.session_deadline_ms = None;
        self.session_next_attempt_ms = None;
        self.backoff.reset();
        vec![ConnectivityAction::AnnounceSession]
    }

    pub fn session_failed(&mut self, now_ms: u64) {
        let delay = match self.session {
            SessionStatus::Disconnected => return,
            SessionStatus::Connecting => self.backoff.on_failure(),
            SessionStatus::Connected => self.backoff.current_ms(),
        };
        warn!("broker session down, retrying in {delay} ms");
        self.session = SessionStatus::Disconnected;
        self.session_deadline_ms = None;
        self.session_next_attempt_ms = Some(now_ms.saturating_add(delay));
    }

    pub fn association_stalled(&self, now_ms: u64) -> bool {
        !self.config.local_fallback_enabled
            && self.link != LinkStatus::Connected
            && self
                .unassociated_since_ms
                .is_some_and(|since| now_ms.saturating_sub(since) >= self.config.stall_alarm_ms)
    }

    pub fn state(&self, now_ms: u64) -> ConnectionState {
        ConnectionState {
            link: self.link,
            session: self.session,
            link_retry_interval_ms: self.config.reconnect_interval_ms,
            session_backoff_ms: self.backoff.current_ms(),
            session_failures: self.backoff.failures(),
            last_link_attempt_ms: self.last_link_attempt_ms,
            last_session_attempt_ms: self.last_session_attempt_ms,
            session_next_attempt_ms: self.session_next_attempt_ms,
            fallback_entered_ms: self.fallback_entered_ms,
            association_stalled: self.association_stalled(now_ms),
        }
    }

    fn poll_session(&mut self, now_ms: u64, actions: &mut Vec<ConnectivityAction>) {
        if !self.session_enabled {
            return;
        }

        match self.session {
            SessionStatus::Disconnected => {
                let due = self
                    .session_next_attempt_ms
                    .map(|next| now_ms >= next)
                    .unwrap_or(true);
                if due {
                    debug!("connecting broker session");
                    self.session = SessionStatus::Connecting;
                    self.last_session_attempt_ms = Some(now_ms);
                    self.session_deadline_ms =
                        Some(now_ms.saturating_add(self.config.session_timeout_ms));
                    actions.push(ConnectivityAction::ConnectSession);
                }
            }
            SessionStatus::Connecting => {
                if self
                    .session_deadline_ms
                    .is_some_and(|deadline| now_ms > deadline)
                {
                    warn!("broker session attempt timed out");
                    actions.push(ConnectivityAction::DisconnectSession);
                    self.session_failed(now_ms);
                }
            }
            SessionStatus::Connected => {}
        }
    }

    fn begin_association(&mut self, now_ms: u64, actions: &mut Vec<ConnectivityAction>) {
        info!("starting wifi association");
        self.link = LinkStatus::Connecting;
        self.last_link_attempt_ms = Some(now_ms);
        self.link_deadline_ms = Some(now_ms.saturating_add(self.config.association_timeout_ms));
        actions.push(ConnectivityAction::StartAssociation);
    }

    fn enter_fallback(&mut self, now_ms: u64, actions: &mut Vec<ConnectivityAction>) {
        self.link = LinkStatus::LocalFallback;
        self.fallback_entered_ms = Some(now_ms);
        actions.push(ConnectivityAction::StartAccessPoint);
    }

    /// Level 2 cannot outlive level 1. The next attempt is immediate once the
    /// link returns; the backoff delay is kept.
    fn drop_session(&mut self, actions: &mut Vec<ConnectivityAction>) {
        if self.session != SessionStatus::Disconnected {
            actions.push(ConnectivityAction::DisconnectSession);
        }
        self.session = SessionStatus::Disconnected;
        self.session_deadline_ms = None;
        self.session_next_attempt_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use ConnectivityAction::*;

    fn supervisor(fallback: bool) -> ConnectivitySupervisor {
        let config = ConnectivityConfig {
            local_fallback_enabled: fallback,
            ..ConnectivityConfig::default()
        };
        ConnectivitySupervisor::new(config, true, true)
    }

    /// Associates the link at `now_ms` and leaves the session attempt pending.
    fn associated(fallback: bool, now_ms: u64) -> ConnectivitySupervisor {
        let mut supervisor = supervisor(fallback);
        assert_eq!(supervisor.poll(now_ms, false), vec![StartAssociation]);
        assert_eq!(supervisor.poll(now_ms, true), vec![ConnectSession]);
        supervisor
    }

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut backoff = Backoff::new(5_000, 300_000);
        let delays: Vec<u64> = (0..4).map(|_| backoff.on_failure()).collect();
        assert_eq!(delays, vec![5_000, 10_000, 20_000, 40_000]);

        backoff.reset();
        assert_eq!(backoff.on_failure(), 5_000);

        for _ in 0..10 {
            backoff.on_failure();
        }
        assert_eq!(backoff.current_ms(), 300_000);
        assert_eq!(backoff.on_failure(), 300_000);
    }

    #[test]
    fn association_timeout_enters_local_fallback() {
        let mut supervisor = supervisor(true);

        assert_eq!(supervisor.poll(0, false), vec![StartAssociation]);
        assert_eq!(supervisor.link(), LinkStatus::Connecting);
        assert!(supervisor.poll(60_000, false).is_empty());

        assert_eq!(
            supervisor.poll(60_001, false),
            vec![StopAssociation, StartAccessPoint]
        );
        assert_eq!(supervisor.link(), LinkStatus::LocalFallback);
        assert_eq!(supervisor.state(60_001).fallback_entered_ms, Some(60_001));
    }

    #[test]
    fn fallback_timeout_retries_association_when_credentials_exist() {
        let mut supervisor = supervisor(true);
        supervisor.poll(0, false);
        supervisor.poll(60_001, false);

        assert!(supervisor.poll(960_001, false).is_empty());
        assert_eq!(
            supervisor.poll(960_002, false),
            vec![StopAccessPoint, StartAssociation]
        );
        assert_eq!(supervisor.link(), LinkStatus::Connecting);
    }

    #[test]
    fn without_credentials_fallback_is_held() {
        let config = ConnectivityConfig::default();
        let mut supervisor = ConnectivitySupervisor::new(config, false, false);

        assert_eq!(supervisor.poll(0, false), vec![StartAccessPoint]);
        assert!(supervisor.poll(2_000_000, false).is_empty());
        assert_eq!(supervisor.link(), LinkStatus::LocalFallback);

        assert_eq!(
            supervisor.credentials_changed(true, 2_000_500),
            vec![StopAccessPoint, StartAssociation]
        );
        assert_eq!(supervisor.link(), LinkStatus::Connecting);
    }

    #[test]
    fn without_fallback_policy_retries_on_fixed_interval_and_raises_stall() {
        let mut supervisor = supervisor(false);

        supervisor.poll(0, false);
        assert_eq!(supervisor.poll(60_001, false), vec![StopAssociation]);
        assert_eq!(supervisor.link(), LinkStatus::Disconnected);

        assert!(supervisor.poll(90_001, false).is_empty());
        assert_eq!(supervisor.poll(90_002, false), vec![StartAssociation]);

        assert!(!supervisor.association_stalled(599_999));
        assert!(supervisor.state(600_000).association_stalled);

        supervisor.poll(600_000, true);
        assert!(!supervisor.state(600_000).association_stalled);
    }

    #[test]
    fn session_failures_back_off_and_success_resets() {
        let mut supervisor = associated(true, 0);
        let mut now = 0;
        let mut waits = Vec::new();

        for _ in 0..4 {
            supervisor.session_failed(now);
            let next = supervisor.state(now).session_next_attempt_ms.unwrap();
            waits.push(next - now);
            assert!(supervisor.poll(next - 1, true).is_empty());
            assert_eq!(supervisor.poll(next, true), vec![ConnectSession]);
            now = next;
        }
        assert_eq!(waits, vec![5_000, 10_000, 20_000, 40_000]);

        assert_eq!(supervisor.session_established(now), vec![AnnounceSession]);
        assert_eq!(supervisor.session(), SessionStatus::Connected);
        assert_eq!(supervisor.backoff().current_ms(), 5_000);
        assert_eq!(supervisor.backoff().failures(), 0);
    }

    #[test]
    fn session_attempt_deadline_counts_as_failure() {
        let mut supervisor = associated(true, 0);

        assert!(supervisor.poll(30_000, true).is_empty());
        assert_eq!(supervisor.poll(30_001, true), vec![DisconnectSession]);
        assert_eq!(supervisor.session(), SessionStatus::Disconnected);
        assert_eq!(
            supervisor.state(30_001).session_next_attempt_ms,
            Some(35_001)
        );
    }

    #[test]
    fn link_loss_forces_session_down_and_reconnects_immediately_after() {
        let mut supervisor = associated(true, 0);
        supervisor.session_established(1_000);

        assert_eq!(supervisor.poll(10_000, false), vec![DisconnectSession]);
        assert_eq!(supervisor.link(), LinkStatus::Disconnected);
        assert_eq!(supervisor.session(), SessionStatus::Disconnected);

        // Previous association attempt was at 0, so the retry is already due.
        assert_eq!(supervisor.poll(40_001, false), vec![StartAssociation]);
        assert_eq!(supervisor.poll(41_000, true), vec![ConnectSession]);
    }

    #[test]
    fn session_waits_for_link_and_enable_flag() {
        let mut supervisor = supervisor(true);
        supervisor.session_settings_changed(false);
        supervisor.poll(0, false);
        assert!(supervisor.poll(1_000, true).is_empty());

        assert!(supervisor.session_settings_changed(true).is_empty());
        assert_eq!(supervisor.poll(2_000, true), vec![ConnectSession]);

        assert_eq!(
            supervisor.session_settings_changed(false),
            vec![DisconnectSession]
        );
        assert_eq!(supervisor.session(), SessionStatus::Disconnected);
    }

    #[test]
    fn new_broker_settings_restart_a_live_session() {
        let mut supervisor = associated(true, 0);
        supervisor.session_failed(1_000);
        assert_eq!(supervisor.backoff().failures(), 1);
        assert_eq!(supervisor.poll(6_000, true), vec![ConnectSession]);

        assert_eq!(
            supervisor.session_settings_changed(true),
            vec![DisconnectSession]
        );
        assert_eq!(supervisor.backoff().failures(), 0);
        assert_eq!(supervisor.poll(6_100, true), vec![ConnectSession]);
    }

    #[test]
    fn forced_fallback_tears_down_both_levels() {
        let mut supervisor = associated(true, 0);
        supervisor.session_established(500);

        assert_eq!(
            supervisor.force_local_fallback(1_000),
            vec![DisconnectSession, StopAssociation, StartAccessPoint]
        );
        assert_eq!(supervisor.link(), LinkStatus::LocalFallback);
        assert!(supervisor.force_local_fallback(2_000).is_empty());
    }

    #[test]
    fn established_session_drop_waits_current_delay() {
        let mut supervisor = associated(true, 0);
        supervisor.session_established(100);

        supervisor.session_failed(1_000);
        assert_eq!(supervisor.state(1_000).session_next_attempt_ms, Some(6_000));
        assert_eq!(supervisor.backoff().failures(), 0);
    }
}
