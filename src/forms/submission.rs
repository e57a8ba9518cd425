//! Form submission state machine
//!
//! [`Form`] is a plain value moved between phases by pure transition
//! methods. [`FormController`] wraps it for async use: it owns the form,
//! runs the [`SubmitAction`] between the transitions, and broadcasts every
//! phase change.
//!
//! ```text
//! Idle ──submit──▶ Submitting ──accepted──▶ Success ──▶ Idle (defaults)
//!  ▲  │                 │
//!  │  └──invalid──┐     └──rejected / failed──┐
//!  │              ▼                           ▼
//!  └───edit─── Error ◀────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::validation::{FormErrors, FormField, FormValues, Schema};
use crate::graphql::operations::ServerFieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Success,
    Error,
}

/// What a submit request turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStart<F: FormField> {
    /// A submission is already in flight
    Ignored,
    /// Local validation failed; the form is in `Error`
    Invalid,
    /// The form is `Submitting` these values
    Ready(FormValues<F>),
}

/// Result of running the submit action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<T> {
    Accepted(T),
    /// The server rejected the values with field-scoped errors
    Rejected(Vec<ServerFieldError>),
    /// The request did not complete
    Failed(String),
}

/// Values, errors and phase of one form instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form<F: FormField> {
    values: FormValues<F>,
    errors: FormErrors<F>,
    phase: Phase,
}

impl<F: FormField> Default for Form<F> {
    fn default() -> Self {
        Self {
            values: FormValues::default(),
            errors: FormErrors::default(),
            phase: Phase::Idle,
        }
    }
}

impl<F: FormField> Form<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &FormValues<F> {
        &self.values
    }

    pub fn errors(&self) -> &FormErrors<F> {
        &self.errors
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_submitting(&self) -> bool {
        self.phase == Phase::Submitting
    }

    /// Change one field. Its error and any form-level error are cleared;
    /// other fields keep theirs. A form in `Error` returns to `Idle`.
    pub fn edit(&mut self, field: F, value: impl Into<String>) {
        self.values.set(field, value);
        self.errors.remove(field);
        self.errors.clear_form_error();
        if self.phase == Phase::Error {
            self.phase = Phase::Idle;
        }
    }

    /// Guarded entry into `Submitting`, running full validation first
    pub fn begin_submit(&mut self, schema: &Schema<F>) -> SubmitStart<F> {
        if self.is_submitting() {
            return SubmitStart::Ignored;
        }

        let errors = schema.validate(&self.values);
        if !errors.is_empty() {
            self.errors = errors;
            self.phase = Phase::Error;
            return SubmitStart::Invalid;
        }

        self.errors = FormErrors::new();
        self.phase = Phase::Submitting;
        SubmitStart::Ready(self.values.clone())
    }

    /// Leave `Submitting` according to the action's outcome. Does nothing
    /// when no submission is in flight.
    pub fn finish<T>(&mut self, outcome: &ActionOutcome<T>) {
        if !self.is_submitting() {
            return;
        }
        match outcome {
            ActionOutcome::Accepted(_) => {
                self.phase = Phase::Success;
            }
            ActionOutcome::Rejected(errors) => {
                self.errors = FormErrors::from_server(errors);
                if self.errors.is_empty() {
                    self.errors = FormErrors::form_level("Submission was rejected");
                }
                self.phase = Phase::Error;
            }
            ActionOutcome::Failed(message) => {
                self.errors = FormErrors::form_level(message.clone());
                self.phase = Phase::Error;
            }
        }
    }

    /// Back to empty values, no errors, `Idle`
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Work done with validated values, e.g. running a mutation
#[async_trait]
pub trait SubmitAction<F: FormField>: Send + Sync {
    type Output: Send;

    async fn submit(&self, values: &FormValues<F>) -> ActionOutcome<Self::Output>;
}

/// What [`FormController::submit`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult<T> {
    Ignored,
    Invalid,
    Rejected,
    Failed,
    Succeeded(T),
}

const TRANSITION_CAPACITY: usize = 32;

/// Owns a [`Form`] and drives it through a submission
pub struct FormController<F: FormField, A: SubmitAction<F>> {
    shared: Arc<Shared<F, A>>,
}

struct Shared<F: FormField, A: SubmitAction<F>> {
    schema: Schema<F>,
    action: A,
    form: Mutex<Form<F>>,
    transitions: broadcast::Sender<Phase>,
}

impl<F: FormField, A: SubmitAction<F>> Shared<F, A> {
    fn announce(&self, before: Phase, after: Phase) {
        if before != after {
            // No receivers is fine
            let _ = self.transitions.send(after);
        }
    }

    /// Land the action's outcome on the form
    fn complete(&self, outcome: ActionOutcome<A::Output>) -> SubmitResult<A::Output> {
        let mut form = self.form.lock();
        form.finish(&outcome);
        let phase = form.phase();
        match outcome {
            ActionOutcome::Accepted(output) => {
                form.reset();
                drop(form);
                self.announce(Phase::Submitting, phase);
                self.announce(phase, Phase::Idle);
                info!("Form submitted");
                SubmitResult::Succeeded(output)
            }
            ActionOutcome::Rejected(errors) => {
                drop(form);
                self.announce(Phase::Submitting, phase);
                info!(count = errors.len(), "Submission rejected by server");
                SubmitResult::Rejected
            }
            ActionOutcome::Failed(message) => {
                drop(form);
                self.announce(Phase::Submitting, phase);
                warn!(error = %message, "Submission failed");
                SubmitResult::Failed
            }
        }
    }
}

impl<F: FormField, A: SubmitAction<F>> FormController<F, A> {
    pub fn new(schema: Schema<F>, action: A) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                schema,
                action,
                form: Mutex::new(Form::new()),
                transitions,
            }),
        }
    }

    /// Copy of the current form state
    pub fn snapshot(&self) -> Form<F> {
        self.shared.form.lock().clone()
    }

    /// Every phase the form enters from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Phase> {
        self.shared.transitions.subscribe()
    }

    pub fn edit(&self, field: F, value: impl Into<String>) {
        let (before, after) = {
            let mut form = self.shared.form.lock();
            let before = form.phase();
            form.edit(field, value);
            (before, form.phase())
        };
        self.shared.announce(before, after);
    }

    /// Re-validate one field in place, leaving the others untouched
    pub fn validate_field(&self, field: F) -> Option<String> {
        let mut form = self.shared.form.lock();
        let message = self.shared.schema.validate_field(field, form.values());
        match &message {
            Some(m) => form.errors.insert(field, m.clone()),
            None => {
                form.errors.remove(field);
            }
        }
        message
    }
}

impl<F, A> FormController<F, A>
where
    F: FormField,
    A: SubmitAction<F> + 'static,
    A::Output: 'static,
{
    /// Validate and submit. A call made while another is in flight returns
    /// [`SubmitResult::Ignored`] without side effects.
    ///
    /// The action runs on its own task: dropping the returned future does
    /// not abandon the submission, its outcome still lands on the form.
    pub async fn submit(&self) -> SubmitResult<A::Output> {
        let (start, before) = {
            let mut form = self.shared.form.lock();
            let before = form.phase();
            (form.begin_submit(&self.shared.schema), before)
        };

        let values = match start {
            SubmitStart::Ignored => {
                debug!("Submission already in flight, ignoring");
                return SubmitResult::Ignored;
            }
            SubmitStart::Invalid => {
                self.shared.announce(before, Phase::Error);
                debug!(errors = ?self.snapshot().errors().to_map(), "Form has validation errors");
                return SubmitResult::Invalid;
            }
            SubmitStart::Ready(values) => values,
        };
        self.shared.announce(before, Phase::Submitting);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let outcome = shared.action.submit(&values).await;
            shared.complete(outcome)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // The action panicked; release the guard
                warn!(error = %e, "Submission task failed");
                self.shared
                    .complete(ActionOutcome::Failed("Submission did not complete".to_string()))
            }
        }
    }
}
