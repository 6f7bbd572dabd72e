use thiserror::Error;

use crate::dialogue::states::{
    DialogueAction, DialogueContext, DialogueEvent, DialogueState, TransitionOutcome,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueTransitionError {
    #[error("invalid dialogue transition from {state:?} using event {event:?}")]
    InvalidTransition { state: DialogueState, event: DialogueEvent },
    #[error("cannot commit from {state:?} with missing required slots: {missing_slots:?}")]
    MissingRequiredSlots { state: DialogueState, missing_slots: Vec<String> },
}

/// Pure transition function for the slot-filling dialogue.
///
/// `ActionSelected` and `SlotFilled` both re-evaluate the slot map: the next
/// missing required slot is asked for, then confirmation when the action
/// demands it, then the commit. Cancellation is legal from any state.
pub fn transition(
    current: &DialogueState,
    event: &DialogueEvent,
    context: &DialogueContext,
) -> Result<TransitionOutcome, DialogueTransitionError> {
    use DialogueAction::{
        ClearSlots, InvokeAdapter, PromptConfirmation, PromptSlot, RenderFailure, RenderSuccess,
        RepromptSlot, ScheduleRetry,
    };
    use DialogueEvent::{
        ActionSelected, Cancelled, CommitFailedFatal, CommitFailedTransient, CommitSucceeded,
        ConfirmationDeclined, Confirmed, SlotFilled, SlotRejected,
    };
    use DialogueState::{Collecting, Committing, Confirming, Done, Idle};

    let (to, actions) = match (current, event) {
        (_, Cancelled) => (Idle, vec![ClearSlots]),

        (Idle, ActionSelected) | (Done, ActionSelected) | (Collecting { .. }, SlotFilled { .. }) => {
            match context.missing_required_slots.first() {
                Some(slot) => {
                    (Collecting { slot: slot.clone() }, vec![PromptSlot { slot: slot.clone() }])
                }
                None if context.requires_confirmation => (Confirming, vec![PromptConfirmation]),
                None => (Committing, vec![InvokeAdapter]),
            }
        }

        (Collecting { slot }, SlotRejected { slot: rejected }) if slot == rejected => {
            (Collecting { slot: slot.clone() }, vec![RepromptSlot { slot: slot.clone() }])
        }

        (Confirming, Confirmed) => {
            if !context.missing_required_slots.is_empty() {
                return Err(DialogueTransitionError::MissingRequiredSlots {
                    state: current.clone(),
                    missing_slots: context.missing_required_slots.clone(),
                });
            }
            (Committing, vec![InvokeAdapter])
        }
        (Confirming, ConfirmationDeclined) => (Idle, vec![ClearSlots]),

        (Committing, CommitSucceeded) => (Done, vec![RenderSuccess]),
        (Committing, CommitFailedTransient) => (Committing, vec![ScheduleRetry]),
        (Committing, CommitFailedFatal) => (Idle, vec![RenderFailure, ClearSlots]),

        _ => {
            return Err(DialogueTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use super::{transition, DialogueTransitionError};
    use crate::dialogue::states::{
        DialogueAction, DialogueContext, DialogueEvent, DialogueState,
    };

    fn context(missing: &[&str], requires_confirmation: bool) -> DialogueContext {
        DialogueContext {
            missing_required_slots: missing.iter().map(|s| s.to_string()).collect(),
            requires_confirmation,
        }
    }

    #[test]
    fn slot_filling_happy_path_without_confirmation() {
        let started = transition(
            &DialogueState::Idle,
            &DialogueEvent::ActionSelected,
            &context(&["title", "list_name"], false),
        )
        .expect("idle -> collecting");
        assert_eq!(started.to, DialogueState::Collecting { slot: "title".into() });
        assert_eq!(started.actions, vec![DialogueAction::PromptSlot { slot: "title".into() }]);

        let next = transition(
            &started.to,
            &DialogueEvent::SlotFilled { slot: "title".into() },
            &context(&["list_name"], false),
        )
        .expect("collecting -> collecting next");
        assert_eq!(next.to, DialogueState::Collecting { slot: "list_name".into() });

        let committing = transition(
            &next.to,
            &DialogueEvent::SlotFilled { slot: "list_name".into() },
            &context(&[], false),
        )
        .expect("collecting -> committing");
        assert_eq!(committing.to, DialogueState::Committing);
        assert_eq!(committing.actions, vec![DialogueAction::InvokeAdapter]);

        let done = transition(&committing.to, &DialogueEvent::CommitSucceeded, &context(&[], false))
            .expect("committing -> done");
        assert_eq!(done.to, DialogueState::Done);
        assert_eq!(done.actions, vec![DialogueAction::RenderSuccess]);
    }

    #[test]
    fn confirmation_is_required_before_commit_when_demanded() {
        let confirming = transition(
            &DialogueState::Idle,
            &DialogueEvent::ActionSelected,
            &context(&[], true),
        )
        .expect("idle -> confirming");
        assert_eq!(confirming.to, DialogueState::Confirming);
        assert_eq!(confirming.actions, vec![DialogueAction::PromptConfirmation]);

        let committing =
            transition(&confirming.to, &DialogueEvent::Confirmed, &context(&[], true))
                .expect("confirming -> committing");
        assert_eq!(committing.to, DialogueState::Committing);
    }

    #[test]
    fn declined_confirmation_resets_to_idle() {
        let outcome = transition(
            &DialogueState::Confirming,
            &DialogueEvent::ConfirmationDeclined,
            &context(&[], true),
        )
        .expect("confirming -> idle");
        assert_eq!(outcome.to, DialogueState::Idle);
        assert_eq!(outcome.actions, vec![DialogueAction::ClearSlots]);
    }

    #[test]
    fn confirmed_commit_is_rejected_while_required_slots_are_missing() {
        let error = transition(
            &DialogueState::Confirming,
            &DialogueEvent::Confirmed,
            &context(&["recipient"], true),
        )
        .expect_err("must reject commit with missing slots");

        assert!(matches!(
            error,
            DialogueTransitionError::MissingRequiredSlots { ref missing_slots, .. }
                if missing_slots == &vec!["recipient".to_string()]
        ));
    }

    #[test]
    fn rejected_slot_value_reprompts_the_same_slot() {
        let state = DialogueState::Collecting { slot: "recipient".into() };
        let outcome = transition(
            &state,
            &DialogueEvent::SlotRejected { slot: "recipient".into() },
            &context(&["recipient"], false),
        )
        .expect("collecting stays collecting");
        assert_eq!(outcome.to, state);
        assert_eq!(outcome.actions, vec![DialogueAction::RepromptSlot { slot: "recipient".into() }]);
    }

    #[test]
    fn transient_commit_failure_stays_in_committing() {
        let outcome = transition(
            &DialogueState::Committing,
            &DialogueEvent::CommitFailedTransient,
            &context(&[], false),
        )
        .expect("committing stays committing");
        assert_eq!(outcome.to, DialogueState::Committing);
        assert_eq!(outcome.actions, vec![DialogueAction::ScheduleRetry]);
    }

    #[test]
    fn fatal_commit_failure_resets_to_idle() {
        let outcome = transition(
            &DialogueState::Committing,
            &DialogueEvent::CommitFailedFatal,
            &context(&[], false),
        )
        .expect("committing -> idle");
        assert_eq!(outcome.to, DialogueState::Idle);
        assert_eq!(
            outcome.actions,
            vec![DialogueAction::RenderFailure, DialogueAction::ClearSlots]
        );
    }

    #[test]
    fn cancellation_is_legal_from_any_state() {
        for state in [
            DialogueState::Idle,
            DialogueState::Collecting { slot: "title".into() },
            DialogueState::Confirming,
            DialogueState::Committing,
            DialogueState::Done,
        ] {
            let outcome = transition(&state, &DialogueEvent::Cancelled, &context(&[], false))
                .expect("cancel always allowed");
            assert_eq!(outcome.to, DialogueState::Idle);
            assert_eq!(outcome.actions, vec![DialogueAction::ClearSlots]);
        }
    }

    #[test]
    fn done_restarts_on_next_action_selection() {
        let outcome = transition(
            &DialogueState::Done,
            &DialogueEvent::ActionSelected,
            &context(&["title"], false),
        )
        .expect("done -> collecting");
        assert_eq!(outcome.to, DialogueState::Collecting { slot: "title".into() });
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let error = transition(
            &DialogueState::Idle,
            &DialogueEvent::CommitSucceeded,
            &DialogueContext::default(),
        )
        .expect_err("idle cannot complete a commit");

        assert!(matches!(error, DialogueTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let events = [
            (DialogueEvent::ActionSelected, context(&["title"], false)),
            (DialogueEvent::SlotFilled { slot: "title".into() }, context(&[], false)),
            (DialogueEvent::CommitSucceeded, context(&[], false)),
        ];

        let run = || {
            let mut state = DialogueState::Idle;
            let mut actions = Vec::new();
            for (event, ctx) in &events {
                let outcome = transition(&state, event, ctx).expect("deterministic run");
                actions.push(outcome.actions.clone());
                state = outcome.to;
            }
            (state, actions)
        };

        assert_eq!(run(), run());
    }
}
