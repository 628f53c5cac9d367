//! The pure per-user transition function.
//!
//! Everything that decides how a session changes lives here: first contact,
//! pause resolution, free-text capture, menu selection, graph-integrity
//! recovery, and the watchdog-originated events. The function never blocks
//! and performs no I/O; the engine sequences sends and persistence around
//! the returned [`Transition`].

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::time::Duration;

use crate::engine::config::EngineConfig;
use crate::flow::{FlowGraph, StageDefinition, StageKind, is_terminal_sentinel};
use crate::session::{Cursor, PauseState, Session, SessionUpdate};

/// One unit of input consumed by the state machine.
///
/// Watchdog events flow through the same per-user queue as messages, so
/// they are ordinary transition inputs and every session mutation has a
/// single site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// An inbound text message from the user.
    Message(String),
    /// Watchdog: the session looked idle when the tick scanned it.
    IdlePrompt,
    /// Watchdog: an outstanding pause prompt looked expired.
    PauseExpired,
}

/// Side effect requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The conversation ended; hand the full answer map to the finalizer.
    Finalize { answers: FxHashMap<String, String> },
}

/// Result of applying one event to one session.
#[derive(Clone, Debug)]
pub struct Transition {
    pub update: SessionUpdate,
    /// Zero-or-one outbound message.
    pub reply: Option<String>,
    pub effect: Option<Effect>,
}

impl Transition {
    fn unchanged() -> Self {
        Self {
            update: SessionUpdate::Unchanged,
            reply: None,
            effect: None,
        }
    }
}

/// Apply `event` to the current session, producing the new session state,
/// an optional reply, and an optional finalization effect.
pub fn transition(
    now: DateTime<Utc>,
    session: Option<&Session>,
    graph: &FlowGraph,
    config: &EngineConfig,
    user_id: &str,
    event: &EngineEvent,
) -> Transition {
    match event {
        EngineEvent::Message(text) => handle_message(now, session, graph, config, user_id, text),
        EngineEvent::IdlePrompt => handle_idle_prompt(now, session, graph, config),
        EngineEvent::PauseExpired => handle_pause_expired(now, session, graph, config),
    }
}

fn handle_message(
    now: DateTime<Utc>,
    session: Option<&Session>,
    graph: &FlowGraph,
    config: &EngineConfig,
    user_id: &str,
    text: &str,
) -> Transition {
    let input = text.trim();

    let Some(session) = session else {
        // First contact: create the session and send the entry prompt. The
        // message content is deliberately ignored, even if numeric.
        return first_contact(now, graph, config, user_id);
    };

    let mut session = session.clone();
    session.last_activity = now;

    if let Some(pause) = session.pause.clone() {
        return resolve_pause(session, &pause, graph, config, input);
    }

    match session.cursor.clone() {
        Cursor::AwaitingText(stage_id) => capture_text(session, &stage_id, graph, config, input),
        Cursor::AtStage(stage_id) => select_option(session, &stage_id, graph, config, input),
    }
}

fn first_contact(
    now: DateTime<Utc>,
    graph: &FlowGraph,
    config: &EngineConfig,
    user_id: &str,
) -> Transition {
    let Some(entry) = graph.lookup(&config.entry_stage) else {
        tracing::warn!(entry = %config.entry_stage, "entry stage missing from flow graph");
        return Transition {
            update: SessionUpdate::Unchanged,
            reply: Some(config.prompts.system_error.clone()),
            effect: None,
        };
    };

    let mut session = Session::new(user_id, &config.entry_stage, now);
    match &entry.kind {
        StageKind::Menu { .. } => Transition {
            update: SessionUpdate::Store(session),
            reply: Some(entry.render()),
            effect: None,
        },
        StageKind::FreeText { .. } => {
            session.cursor = Cursor::AwaitingText(config.entry_stage.clone());
            Transition {
                update: SessionUpdate::Store(session),
                reply: Some(entry.prompt.clone()),
                effect: None,
            }
        }
        // A terminal entry stage is a degenerate flow: greet and keep no state.
        StageKind::Terminal => Transition {
            update: SessionUpdate::Unchanged,
            reply: Some(entry.prompt.clone()),
            effect: None,
        },
    }
}

fn resolve_pause(
    mut session: Session,
    pause: &PauseState,
    graph: &FlowGraph,
    config: &EngineConfig,
    input: &str,
) -> Transition {
    match input {
        "1" => {
            session.pause = None;
            session.cursor = pause.resume.clone();
            let Some(stage) = graph.lookup(session.cursor.stage_id()) else {
                tracing::warn!(stage = %session.cursor.stage_id(), "resume stage vanished during pause");
                return reset_to_entry(session, graph, config);
            };
            let reply = stage.render();
            Transition {
                update: SessionUpdate::Store(session),
                reply: Some(reply),
                effect: None,
            }
        }
        "2" => finalize_to_end(session, &pause.end_stage, graph, config),
        // Anything else re-sends the pause prompt unchanged; sent_at keeps
        // running so the force-end clock is unaffected.
        _ => Transition {
            update: SessionUpdate::Store(session),
            reply: Some(config.prompts.pause_prompt.clone()),
            effect: None,
        },
    }
}

fn capture_text(
    mut session: Session,
    stage_id: &str,
    graph: &FlowGraph,
    config: &EngineConfig,
    input: &str,
) -> Transition {
    let next = match graph.lookup(stage_id) {
        Some(StageDefinition {
            kind: StageKind::FreeText { field, next },
            ..
        }) => {
            // Verbatim capture (trimmed), never interpreted as a selection.
            session.answers.insert(field.clone(), input.to_string());
            next.clone()
        }
        _ => {
            tracing::warn!(stage = %stage_id, "awaited free-text stage vanished or changed kind");
            return reset_to_entry(session, graph, config);
        }
    };
    advance(session, &next, graph, config)
}

fn select_option(
    mut session: Session,
    stage_id: &str,
    graph: &FlowGraph,
    config: &EngineConfig,
    input: &str,
) -> Transition {
    let Some(stage) = graph.lookup(stage_id) else {
        tracing::warn!(stage = %stage_id, "session cursor points at a missing stage");
        return reset_to_entry(session, graph, config);
    };

    match &stage.kind {
        StageKind::Menu { options } => {
            let selection = parse_selection(input).filter(|k| *k <= options.len());
            let Some(k) = selection else {
                // Invalid or out-of-range: error line plus the same menu,
                // cursor untouched.
                let reply = format!("{}\n\n{}", config.prompts.invalid_option, stage.render());
                return Transition {
                    update: SessionUpdate::Store(session),
                    reply: Some(reply),
                    effect: None,
                };
            };
            session
                .answers
                .insert(stage_id.to_string(), k.to_string());
            let next = options[k - 1].next.clone();
            advance(session, &next, graph, config)
        }
        // The graph was reloaded under us and this stage became free-text:
        // re-issue its prompt and start capturing from the next message.
        StageKind::FreeText { .. } => {
            tracing::warn!(stage = %stage_id, "menu cursor now points at a free-text stage");
            session.cursor = Cursor::AwaitingText(stage_id.to_string());
            Transition {
                update: SessionUpdate::Store(session),
                reply: Some(stage.prompt.clone()),
                effect: None,
            }
        }
        StageKind::Terminal => {
            let reply = stage.prompt.clone();
            finalize(session, reply)
        }
    }
}

/// Route to `next` after an answer was recorded.
fn advance(
    mut session: Session,
    next: &str,
    graph: &FlowGraph,
    config: &EngineConfig,
) -> Transition {
    if is_terminal_sentinel(next) {
        let closing = config.prompts.closing.clone();
        return finalize(session, closing);
    }

    let Some(stage) = graph.lookup(next) else {
        tracing::warn!(next = %next, "option routes to a missing stage");
        return reset_to_entry(session, graph, config);
    };

    match &stage.kind {
        StageKind::Menu { .. } => {
            session.cursor = Cursor::AtStage(stage.id.clone());
            let reply = stage.render();
            Transition {
                update: SessionUpdate::Store(session),
                reply: Some(reply),
                effect: None,
            }
        }
        StageKind::FreeText { .. } => {
            session.cursor = Cursor::AwaitingText(stage.id.clone());
            let reply = stage.prompt.clone();
            Transition {
                update: SessionUpdate::Store(session),
                reply: Some(reply),
                effect: None,
            }
        }
        StageKind::Terminal => {
            let reply = stage.prompt.clone();
            finalize(session, reply)
        }
    }
}

/// Graph-integrity recovery: back to the entry stage with a system-error
/// line. The session survives (answers kept); only its position resets.
fn reset_to_entry(mut session: Session, graph: &FlowGraph, config: &EngineConfig) -> Transition {
    session.cursor = Cursor::AtStage(config.entry_stage.clone());
    session.pause = None;
    let reply = match graph.lookup(&config.entry_stage) {
        Some(entry) => format!("{}\n\n{}", config.prompts.system_error, entry.render()),
        None => config.prompts.system_error.clone(),
    };
    Transition {
        update: SessionUpdate::Store(session),
        reply: Some(reply),
        effect: None,
    }
}

fn finalize(session: Session, reply: String) -> Transition {
    Transition {
        update: SessionUpdate::Discard,
        reply: Some(reply),
        effect: Some(Effect::Finalize {
            answers: session.answers,
        }),
    }
}

fn finalize_to_end(
    session: Session,
    end_stage: &str,
    graph: &FlowGraph,
    config: &EngineConfig,
) -> Transition {
    let reply = if is_terminal_sentinel(end_stage) {
        config.prompts.closing.clone()
    } else {
        match graph.lookup(end_stage) {
            Some(stage) => stage.render(),
            None => {
                tracing::warn!(stage = %end_stage, "configured pause end stage is missing");
                config.prompts.closing.clone()
            }
        }
    };
    finalize(session, reply)
}

fn handle_idle_prompt(
    now: DateTime<Utc>,
    session: Option<&Session>,
    graph: &FlowGraph,
    config: &EngineConfig,
) -> Transition {
    let Some(session) = session else {
        return Transition::unchanged();
    };
    if session.pause.is_some() {
        return Transition::unchanged();
    }
    // The user may have sent a message between the watchdog scan and this
    // task running; re-validate idleness before prompting.
    let threshold = config.effective_idle_threshold(graph);
    if !exceeded(now, session.last_activity, threshold) {
        return Transition::unchanged();
    }

    let mut session = session.clone();
    session.pause = Some(PauseState {
        resume: session.cursor.clone(),
        end_stage: config.effective_pause_end_stage(graph),
        sent_at: now,
    });
    session.last_activity = now;
    Transition {
        update: SessionUpdate::Store(session),
        reply: Some(config.prompts.pause_prompt.clone()),
        effect: None,
    }
}

fn handle_pause_expired(
    now: DateTime<Utc>,
    session: Option<&Session>,
    graph: &FlowGraph,
    config: &EngineConfig,
) -> Transition {
    let Some(session) = session else {
        return Transition::unchanged();
    };
    let Some(pause) = session.pause.clone() else {
        // Resolved by the user while this event sat in the queue.
        return Transition::unchanged();
    };
    let threshold = config.effective_idle_threshold(graph);
    if !exceeded(now, pause.sent_at, threshold) {
        return Transition::unchanged();
    }
    finalize_to_end(session.clone(), &pause.end_stage, graph, config)
}

/// Strict positive-integer parse: whole trimmed input, no trailing junk.
fn parse_selection(input: &str) -> Option<usize> {
    input.parse::<usize>().ok().filter(|k| *k >= 1)
}

fn exceeded(now: DateTime<Utc>, since: DateTime<Utc>, threshold: Duration) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .map(|elapsed| elapsed > threshold)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::parse_rows;
    use proptest::prelude::*;

    fn graph() -> FlowGraph {
        let rows: Vec<Vec<String>> = vec![
            vec!["0", "Welcome", "Sales", "1", "Support", "2"],
            vec!["1", "Which plan?", "Starter", "3", "Enterprise", "3"],
            vec!["2", "Describe your issue", "[issue]", "3"],
            vec!["3", "Anything else?", "Leave email", "4", "Finish", "final"],
            vec!["4", "Please type your email", "[email]", "5"],
            vec!["5", "Thanks, we will be in touch."],
        ]
        .into_iter()
        .map(|r| r.into_iter().map(str::to_string).collect())
        .collect();
        parse_rows(&rows).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_idle_threshold(Duration::from_secs(60))
    }

    fn msg(text: &str) -> EngineEvent {
        EngineEvent::Message(text.to_string())
    }

    fn stored(t: &Transition) -> &Session {
        match &t.update {
            SessionUpdate::Store(s) => s,
            other => panic!("expected stored session, got {other:?}"),
        }
    }

    #[test]
    fn first_message_is_swallowed_even_when_numeric() {
        let now = Utc::now();
        let t = transition(now, None, &graph(), &config(), "u1", &msg("2"));
        let session = stored(&t);
        assert_eq!(session.cursor, Cursor::AtStage("0".into()));
        assert_eq!(t.reply.as_deref(), Some("Welcome\n1. Sales\n2. Support"));
        assert!(t.effect.is_none());
    }

    #[test]
    fn valid_selection_advances_and_records_the_choice() {
        let now = Utc::now();
        let session = Session::new("u1", "0", now);
        let t = transition(now, Some(&session), &graph(), &config(), "u1", &msg("2"));
        let next = stored(&t);
        assert_eq!(next.cursor, Cursor::AwaitingText("2".into()));
        assert_eq!(next.answers.get("0").map(String::as_str), Some("2"));
        assert_eq!(t.reply.as_deref(), Some("Describe your issue"));
    }

    #[test]
    fn invalid_selection_reprompts_without_moving() {
        let now = Utc::now();
        let session = Session::new("u1", "0", now);
        for input in ["9", "0", "abc", "2abc", "-1", ""] {
            let t = transition(now, Some(&session), &graph(), &config(), "u1", &msg(input));
            let kept = stored(&t);
            assert_eq!(kept.cursor, Cursor::AtStage("0".into()), "input {input:?}");
            let reply = t.reply.unwrap();
            assert!(reply.contains("not a valid option"), "input {input:?}");
            assert!(reply.ends_with("Welcome\n1. Sales\n2. Support"));
        }
    }

    #[test]
    fn free_text_is_captured_verbatim() {
        let now = Utc::now();
        let mut session = Session::new("u1", "2", now);
        session.cursor = Cursor::AwaitingText("2".into());
        let t = transition(
            now,
            Some(&session),
            &graph(),
            &config(),
            "u1",
            &msg("  the app crashes on login  "),
        );
        let next = stored(&t);
        assert_eq!(
            next.answers.get("issue").map(String::as_str),
            Some("the app crashes on login")
        );
        assert_eq!(next.cursor, Cursor::AtStage("3".into()));
        assert_eq!(
            t.reply.as_deref(),
            Some("Anything else?\n1. Leave email\n2. Finish")
        );
    }

    #[test]
    fn reaching_a_terminal_stage_finalizes_and_discards() {
        let now = Utc::now();
        let mut session = Session::new("u1", "4", now);
        session.cursor = Cursor::AwaitingText("4".into());
        let t = transition(now, Some(&session), &graph(), &config(), "u1", &msg("x@y.z"));
        // Stage 4 routes to stage 5, a terminal stage.
        assert_eq!(t.update, SessionUpdate::Discard);
        assert_eq!(t.reply.as_deref(), Some("Thanks, we will be in touch."));
        match t.effect {
            Some(Effect::Finalize { answers }) => {
                assert_eq!(answers.get("email").map(String::as_str), Some("x@y.z"));
            }
            other => panic!("expected finalize effect, got {other:?}"),
        }
    }

    #[test]
    fn terminal_sentinel_sends_the_fixed_closing_message() {
        let now = Utc::now();
        let cfg = config();
        let mut session = Session::new("u1", "3", now);
        session.cursor = Cursor::AtStage("3".into());
        let t = transition(now, Some(&session), &graph(), &cfg, "u1", &msg("2"));
        assert_eq!(t.update, SessionUpdate::Discard);
        assert_eq!(t.reply.as_deref(), Some(cfg.prompts.closing.as_str()));
        assert!(t.effect.is_some());
    }

    #[test]
    fn dangling_next_resets_to_entry_with_system_error() {
        let rows: Vec<Vec<String>> = vec![
            vec!["0", "Welcome", "Broken", "404"],
        ]
        .into_iter()
        .map(|r| r.into_iter().map(str::to_string).collect())
        .collect();
        let graph = parse_rows(&rows).unwrap();
        let now = Utc::now();
        let session = Session::new("u1", "0", now);
        let t = transition(now, Some(&session), &graph, &config(), "u1", &msg("1"));
        let reset = stored(&t);
        assert_eq!(reset.cursor, Cursor::AtStage("0".into()));
        let reply = t.reply.unwrap();
        assert!(reply.starts_with(&config().prompts.system_error));
        assert!(reply.contains("Welcome"));
    }

    #[test]
    fn input_after_reset_is_a_real_selection() {
        let now = Utc::now();
        // A reset session sits at the entry menu without the swallow flag:
        // it exists, so the next numeric input routes normally.
        let session = Session::new("u1", "0", now);
        let t = transition(now, Some(&session), &graph(), &config(), "u1", &msg("1"));
        assert_eq!(stored(&t).cursor, Cursor::AtStage("1".into()));
    }

    #[test]
    fn idle_prompt_sets_pause_and_preserves_cursor() {
        let cfg = config();
        let now = Utc::now();
        let mut session = Session::new("u1", "0", now - chrono::Duration::seconds(120));
        session.cursor = Cursor::AwaitingText("2".into());
        let t = transition(now, Some(&session), &graph(), &cfg, "u1", &EngineEvent::IdlePrompt);
        let paused = stored(&t);
        let pause = paused.pause.as_ref().unwrap();
        assert_eq!(pause.resume, Cursor::AwaitingText("2".into()));
        assert_eq!(pause.sent_at, now);
        assert_eq!(t.reply.as_deref(), Some(cfg.prompts.pause_prompt.as_str()));
    }

    #[test]
    fn idle_prompt_is_dropped_if_the_user_was_active() {
        let now = Utc::now();
        let session = Session::new("u1", "0", now);
        let t = transition(
            now,
            Some(&session),
            &graph(),
            &config(),
            "u1",
            &EngineEvent::IdlePrompt,
        );
        assert_eq!(t.update, SessionUpdate::Unchanged);
        assert!(t.reply.is_none());
    }

    #[test]
    fn pause_reply_one_restores_the_exact_cursor() {
        let cfg = config();
        let now = Utc::now();
        let mut session = Session::new("u1", "0", now);
        session.cursor = Cursor::AtStage("3".into());
        session.pause = Some(PauseState {
            resume: Cursor::AtStage("3".into()),
            end_stage: "final".into(),
            sent_at: now,
        });
        let t = transition(now, Some(&session), &graph(), &cfg, "u1", &msg("1"));
        let resumed = stored(&t);
        assert!(resumed.pause.is_none());
        assert_eq!(resumed.cursor, Cursor::AtStage("3".into()));
        assert_eq!(
            t.reply.as_deref(),
            Some("Anything else?\n1. Leave email\n2. Finish")
        );
    }

    #[test]
    fn pause_reply_two_force_ends() {
        let cfg = config();
        let now = Utc::now();
        let mut session = Session::new("u1", "0", now);
        session.pause = Some(PauseState {
            resume: Cursor::AtStage("0".into()),
            end_stage: "final".into(),
            sent_at: now,
        });
        let t = transition(now, Some(&session), &graph(), &cfg, "u1", &msg("2"));
        assert_eq!(t.update, SessionUpdate::Discard);
        assert_eq!(t.reply.as_deref(), Some(cfg.prompts.closing.as_str()));
        assert!(t.effect.is_some());
    }

    #[test]
    fn unrecognized_pause_reply_resends_prompt_and_keeps_sent_at() {
        let cfg = config();
        let now = Utc::now();
        let sent_at = now - chrono::Duration::seconds(30);
        let mut session = Session::new("u1", "0", now);
        session.pause = Some(PauseState {
            resume: Cursor::AtStage("0".into()),
            end_stage: "final".into(),
            sent_at,
        });
        let t = transition(now, Some(&session), &graph(), &cfg, "u1", &msg("maybe?"));
        let kept = stored(&t);
        assert_eq!(kept.pause.as_ref().unwrap().sent_at, sent_at);
        assert_eq!(t.reply.as_deref(), Some(cfg.prompts.pause_prompt.as_str()));
    }

    #[test]
    fn expired_pause_finalizes_without_user_input() {
        let now = Utc::now();
        let mut session = Session::new("u1", "0", now);
        session.pause = Some(PauseState {
            resume: Cursor::AtStage("0".into()),
            end_stage: "final".into(),
            sent_at: now - chrono::Duration::seconds(120),
        });
        let t = transition(
            now,
            Some(&session),
            &graph(),
            &config(),
            "u1",
            &EngineEvent::PauseExpired,
        );
        assert_eq!(t.update, SessionUpdate::Discard);
        assert!(t.effect.is_some());
    }

    #[test]
    fn fresh_pause_survives_an_expiry_check() {
        let now = Utc::now();
        let mut session = Session::new("u1", "0", now);
        session.pause = Some(PauseState {
            resume: Cursor::AtStage("0".into()),
            end_stage: "final".into(),
            sent_at: now,
        });
        let t = transition(
            now,
            Some(&session),
            &graph(),
            &config(),
            "u1",
            &EngineEvent::PauseExpired,
        );
        assert_eq!(t.update, SessionUpdate::Unchanged);
    }

    proptest! {
        /// Any input that is not a valid 1..=N selection leaves the cursor
        /// unchanged and re-sends the same menu behind an error line.
        #[test]
        fn arbitrary_invalid_menu_input_never_moves_the_cursor(input in "\\PC*") {
            let graph = graph();
            let cfg = config();
            let now = Utc::now();
            let session = Session::new("u1", "0", now);

            let is_valid = input
                .trim()
                .parse::<usize>()
                .ok()
                .is_some_and(|k| (1..=2).contains(&k));
            prop_assume!(!is_valid);

            let t = transition(now, Some(&session), &graph, &cfg, "u1", &msg(&input));
            match &t.update {
                SessionUpdate::Store(s) => {
                    prop_assert_eq!(&s.cursor, &Cursor::AtStage("0".to_string()));
                }
                other => prop_assert!(false, "unexpected update {:?}", other),
            }
            let reply = t.reply.unwrap();
            prop_assert!(reply.ends_with("Welcome\n1. Sales\n2. Support"));
        }
    }
}
