//! Welcome feedback state machine.
//!
//! ```text
//!            confirm(X)                      confirm(Y), Y != X
//!   Idle ───────────────▶ Announcing(X) ───────────────────────▶ Announcing(Y)
//!    ▲                      │    ▲   │ confirm(X): no-op
//!    └──── session reset ───┘    └───┘
//! ```
//!
//! Two independent timers run off a confirmation: the banner (visible for
//! `banner_dwell`, then a `banner_transition` hide) and the session reset,
//! which returns the machine to `Idle` and forgets the last spoken identity.
//! All transitions take an explicit `now`; the coordinator never reads the
//! clock itself.

use crate::types::{BoundingBox, Profile};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Timer settings for the feedback cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackTimings {
    pub banner_dwell: Duration,
    pub banner_transition: Duration,
    pub session_reset: Duration,
}

impl Default for FeedbackTimings {
    fn default() -> Self {
        Self {
            banner_dwell: Duration::from_secs(5),
            banner_transition: Duration::from_millis(500),
            session_reset: Duration::from_secs(8),
        }
    }
}

/// Text templates for the spoken and displayed welcome.
#[derive(Debug, Clone, PartialEq)]
pub struct WelcomeMessages {
    pub venue: String,
}

impl WelcomeMessages {
    pub fn new(venue: impl Into<String>) -> Self {
        Self { venue: venue.into() }
    }

    pub fn utterance(&self, name: &str) -> String {
        format!("Welcome to {}, {name}", self.venue)
    }

    pub fn banner(&self, name: &str) -> String {
        format!("WELCOME TO {} - {}", self.venue.to_uppercase(), name.to_uppercase())
    }
}

impl Default for WelcomeMessages {
    fn default() -> Self {
        Self::new("IT Department")
    }
}

/// The identity currently being welcomed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMatch {
    pub profile: Profile,
    pub bbox: BoundingBox,
    pub confirmed_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackState {
    Idle,
    Announcing(ActiveMatch),
}

impl FeedbackState {
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackState::Idle => "idle",
            FeedbackState::Announcing(_) => "announcing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerPhase {
    Visible,
    Hiding,
}

/// Banner as the UI should currently show it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BannerView {
    pub text: String,
    pub phase: BannerPhase,
}

#[derive(Debug, Clone)]
struct Banner {
    text: String,
    phase: BannerPhase,
    shown_at: Instant,
}

/// Side effects the owner of the coordinator must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEffect {
    /// Speak `text`, cancelling any utterance still in flight first.
    Speak { profile_id: String, text: String },
    ShowBanner { text: String },
    /// Start the banner hide transition.
    HideBanner,
    BannerHidden,
    SessionReset,
}

/// Decision for one announcement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceDecision {
    Skip,
    Speak { cancel_in_flight: bool },
}

/// Serialises announcements.
///
/// An identity is announced once until [`reset`](Self::reset); an identity
/// already in flight is never re-queued. A different identity cancels
/// whatever is in flight.
#[derive(Debug, Clone, Default)]
pub struct VoiceGate {
    last_spoken: Option<String>,
    in_flight: Option<String>,
}

impl VoiceGate {
    pub fn request(&mut self, profile_id: &str) -> VoiceDecision {
        if self.last_spoken.as_deref() == Some(profile_id)
            || self.in_flight.as_deref() == Some(profile_id)
        {
            return VoiceDecision::Skip;
        }
        let cancel_in_flight = self.in_flight.is_some();
        self.last_spoken = Some(profile_id.to_string());
        self.in_flight = Some(profile_id.to_string());
        VoiceDecision::Speak { cancel_in_flight }
    }

    /// The in-flight utterance ended (completed, failed or was cancelled).
    pub fn finished(&mut self) {
        self.in_flight = None;
    }

    /// Forget the last spoken identity so it may be announced again.
    pub fn reset(&mut self) {
        self.last_spoken = None;
    }

    pub fn is_speaking(&self) -> bool {
        self.in_flight.is_some()
    }
}

/// Owns the welcome state: active match, banner and voice gate.
#[derive(Debug)]
pub struct FeedbackCoordinator {
    state: FeedbackState,
    banner: Option<Banner>,
    voice: VoiceGate,
    timings: FeedbackTimings,
    messages: WelcomeMessages,
}

impl FeedbackCoordinator {
    pub fn new(timings: FeedbackTimings, messages: WelcomeMessages) -> Self {
        Self {
            state: FeedbackState::Idle,
            banner: None,
            voice: VoiceGate::default(),
            timings,
            messages,
        }
    }

    /// React to the matched faces of one tick, in frame order.
    ///
    /// If the active identity is still among them nothing happens; otherwise
    /// the first match pre-empts.
    pub fn observe(&mut self, matches: &[(&Profile, &BoundingBox)], now: Instant) -> Vec<FeedbackEffect> {
        if let FeedbackState::Announcing(active) = &self.state {
            if matches.iter().any(|(p, _)| p.id == active.profile.id) {
                return Vec::new();
            }
        }
        match matches.first() {
            Some((profile, bbox)) => self.confirm(profile, bbox, now),
            None => Vec::new(),
        }
    }

    /// Confirm one identity. A repeat of the active identity is a no-op.
    pub fn confirm(&mut self, profile: &Profile, bbox: &BoundingBox, now: Instant) -> Vec<FeedbackEffect> {
        if let FeedbackState::Announcing(active) = &self.state {
            if active.profile.id == profile.id {
                return Vec::new();
            }
        }

        tracing::info!(
            profile = %profile.id,
            name = %profile.name,
            previous = ?self.active().map(|a| a.profile.id.as_str()),
            "welcoming"
        );

        self.state = FeedbackState::Announcing(ActiveMatch {
            profile: profile.clone(),
            bbox: bbox.clone(),
            confirmed_at: now,
        });

        let mut effects = Vec::with_capacity(2);
        match self.voice.request(&profile.id) {
            VoiceDecision::Speak { cancel_in_flight } => {
                if cancel_in_flight {
                    tracing::debug!("pre-empting in-flight announcement");
                }
                effects.push(FeedbackEffect::Speak {
                    profile_id: profile.id.clone(),
                    text: self.messages.utterance(&profile.name),
                });
            }
            VoiceDecision::Skip => {
                tracing::debug!(profile = %profile.id, "announcement suppressed");
            }
        }

        let text = self.messages.banner(&profile.name);
        self.banner = Some(Banner {
            text: text.clone(),
            phase: BannerPhase::Visible,
            shown_at: now,
        });
        effects.push(FeedbackEffect::ShowBanner { text });
        effects
    }

    /// Advance both timers to `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<FeedbackEffect> {
        let mut effects = Vec::new();

        if let Some(banner) = &mut self.banner {
            let shown_for = now.saturating_duration_since(banner.shown_at);
            if banner.phase == BannerPhase::Visible && shown_for >= self.timings.banner_dwell {
                banner.phase = BannerPhase::Hiding;
                effects.push(FeedbackEffect::HideBanner);
            }
            if banner.phase == BannerPhase::Hiding
                && shown_for >= self.timings.banner_dwell + self.timings.banner_transition
            {
                self.banner = None;
                effects.push(FeedbackEffect::BannerHidden);
            }
        }

        if let FeedbackState::Announcing(active) = &self.state {
            if now.saturating_duration_since(active.confirmed_at) >= self.timings.session_reset {
                tracing::debug!(profile = %active.profile.id, "session reset");
                self.state = FeedbackState::Idle;
                self.voice.reset();
                effects.push(FeedbackEffect::SessionReset);
            }
        }

        effects
    }

    /// Drop the active match immediately. The banner keeps its own timer.
    pub fn reset(&mut self) -> Vec<FeedbackEffect> {
        self.voice.reset();
        match std::mem::replace(&mut self.state, FeedbackState::Idle) {
            FeedbackState::Announcing(_) => vec![FeedbackEffect::SessionReset],
            FeedbackState::Idle => Vec::new(),
        }
    }

    /// The speech backend reports the in-flight utterance is over.
    pub fn voice_finished(&mut self) {
        self.voice.finished();
    }

    pub fn is_speaking(&self) -> bool {
        self.voice.is_speaking()
    }

    pub fn state(&self) -> &FeedbackState {
        &self.state
    }

    pub fn active(&self) -> Option<&ActiveMatch> {
        match &self.state {
            FeedbackState::Announcing(active) => Some(active),
            FeedbackState::Idle => None,
        }
    }

    pub fn banner(&self) -> Option<BannerView> {
        self.banner.as_ref().map(|b| BannerView {
            text: b.text.clone(),
            phase: b.phase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleType;

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.into(),
            name: name.into(),
            role_type: RoleType::Staff,
            designation: "Lecturer".into(),
            qualification: "PhD".into(),
            photo_url: None,
            face_descriptor: None,
            created_at: String::new(),
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox { x: 10.0, y: 10.0, width: 50.0, height: 50.0, confidence: 0.9, landmarks: None }
    }

    fn coordinator() -> FeedbackCoordinator {
        FeedbackCoordinator::new(FeedbackTimings::default(), WelcomeMessages::default())
    }

    fn speaks(effects: &[FeedbackEffect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                FeedbackEffect::Speak { profile_id, .. } => Some(profile_id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_confirmation_speaks_and_shows_banner() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let effects = fc.confirm(&profile("a", "Alice"), &bbox(), t0);
        assert_eq!(
            effects,
            vec![
                FeedbackEffect::Speak {
                    profile_id: "a".into(),
                    text: "Welcome to IT Department, Alice".into(),
                },
                FeedbackEffect::ShowBanner { text: "WELCOME TO IT DEPARTMENT - ALICE".into() },
            ]
        );
        assert_eq!(fc.state().name(), "announcing");
        assert_eq!(fc.active().unwrap().profile.id, "a");
    }

    #[test]
    fn test_alice_then_alice_then_bob() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let alice = profile("a", "Alice");
        let bob = profile("b", "Bob");

        assert_eq!(speaks(&fc.confirm(&alice, &bbox(), t0)), vec!["a"]);
        assert!(fc.confirm(&alice, &bbox(), t0 + Duration::from_secs(1)).is_empty());

        let effects = fc.confirm(&bob, &bbox(), t0 + Duration::from_secs(2));
        assert_eq!(speaks(&effects), vec!["b"]);
        assert_eq!(fc.banner().unwrap().text, "WELCOME TO IT DEPARTMENT - BOB");
        assert_eq!(fc.active().unwrap().profile.name, "Bob");
    }

    #[test]
    fn test_repeated_sightings_announce_once() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let alice = profile("a", "Alice");
        let mut spoken = 0;
        for i in 0..20 {
            let now = t0 + Duration::from_millis(300 * i);
            spoken += speaks(&fc.poll(now)).len();
            spoken += speaks(&fc.observe(&[(&alice, &bbox())], now)).len();
        }
        // 20 ticks × 300 ms stays inside the 8 s session.
        assert_eq!(spoken, 1);
    }

    #[test]
    fn test_reannounce_after_session_reset() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let alice = profile("a", "Alice");
        fc.confirm(&alice, &bbox(), t0);
        fc.voice_finished();

        let effects = fc.poll(t0 + Duration::from_secs(8));
        assert!(effects.contains(&FeedbackEffect::SessionReset));
        assert_eq!(fc.state(), &FeedbackState::Idle);

        let again = fc.observe(&[(&alice, &bbox())], t0 + Duration::from_millis(8300));
        assert_eq!(speaks(&again), vec!["a"]);
    }

    #[test]
    fn test_banner_and_session_timers_are_independent() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        fc.confirm(&profile("a", "Alice"), &bbox(), t0);

        assert!(fc.poll(t0 + Duration::from_millis(4999)).is_empty());

        assert_eq!(fc.poll(t0 + Duration::from_secs(5)), vec![FeedbackEffect::HideBanner]);
        assert_eq!(fc.banner().unwrap().phase, BannerPhase::Hiding);

        assert_eq!(fc.poll(t0 + Duration::from_millis(5500)), vec![FeedbackEffect::BannerHidden]);
        assert!(fc.banner().is_none());
        // Banner gone, person still active.
        assert_eq!(fc.active().unwrap().profile.id, "a");

        assert_eq!(fc.poll(t0 + Duration::from_secs(8)), vec![FeedbackEffect::SessionReset]);
        assert!(fc.active().is_none());
    }

    #[test]
    fn test_poll_catches_up_across_large_gap() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        fc.confirm(&profile("a", "Alice"), &bbox(), t0);
        let effects = fc.poll(t0 + Duration::from_secs(30));
        assert_eq!(
            effects,
            vec![FeedbackEffect::HideBanner, FeedbackEffect::BannerHidden, FeedbackEffect::SessionReset]
        );
    }

    #[test]
    fn test_new_identity_rearms_timers() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        fc.confirm(&profile("a", "Alice"), &bbox(), t0);
        fc.confirm(&profile("b", "Bob"), &bbox(), t0 + Duration::from_secs(4));

        // Alice's banner deadline passes without effect on Bob's banner.
        assert!(fc.poll(t0 + Duration::from_secs(6)).is_empty());
        // Alice's session deadline passes too.
        assert!(fc.poll(t0 + Duration::from_secs(9)).contains(&FeedbackEffect::HideBanner));
        assert_eq!(fc.active().unwrap().profile.id, "b");
        assert!(fc.poll(t0 + Duration::from_secs(12)).contains(&FeedbackEffect::SessionReset));
    }

    #[test]
    fn test_observe_keeps_active_identity_among_several() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let alice = profile("a", "Alice");
        let bob = profile("b", "Bob");
        fc.observe(&[(&alice, &bbox())], t0);

        // Both in frame, Bob enumerated first: Alice stays active.
        let effects = fc.observe(&[(&bob, &bbox()), (&alice, &bbox())], t0 + Duration::from_millis(300));
        assert!(effects.is_empty());
        assert_eq!(fc.active().unwrap().profile.id, "a");
    }

    #[test]
    fn test_observe_no_matches_is_noop() {
        let mut fc = coordinator();
        assert!(fc.observe(&[], Instant::now()).is_empty());
        assert_eq!(fc.state(), &FeedbackState::Idle);
    }

    #[test]
    fn test_explicit_reset() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        let alice = profile("a", "Alice");
        fc.confirm(&alice, &bbox(), t0);
        fc.voice_finished();

        assert_eq!(fc.reset(), vec![FeedbackEffect::SessionReset]);
        assert!(fc.reset().is_empty());
        assert!(fc.banner().is_some());
        assert_eq!(speaks(&fc.confirm(&alice, &bbox(), t0 + Duration::from_secs(1))), vec!["a"]);
    }

    #[test]
    fn test_voice_gate_blocks_identity_in_flight_after_reset() {
        let mut gate = VoiceGate::default();
        assert_eq!(gate.request("a"), VoiceDecision::Speak { cancel_in_flight: false });
        gate.reset();
        // Still speaking Alice: do not overlap the same announcement.
        assert_eq!(gate.request("a"), VoiceDecision::Skip);
        assert_eq!(gate.request("b"), VoiceDecision::Speak { cancel_in_flight: true });
        gate.finished();
        assert!(!gate.is_speaking());
        assert_eq!(gate.request("b"), VoiceDecision::Skip);
    }

    #[test]
    fn test_bob_preempts_alice_in_flight() {
        let mut fc = coordinator();
        let t0 = Instant::now();
        fc.confirm(&profile("a", "Alice"), &bbox(), t0);
        assert!(fc.is_speaking());
        let effects = fc.confirm(&profile("b", "Bob"), &bbox(), t0 + Duration::from_millis(500));
        assert_eq!(speaks(&effects), vec!["b"]);
    }
}
