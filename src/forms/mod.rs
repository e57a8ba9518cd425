//! Form handling: validation and the submission state machine

pub mod signup;
pub mod submission;
pub mod validation;

pub use signup::{SignupAction, SignupField, SignupForm, registration_schema, signup_form};
pub use submission::{ActionOutcome, Form, FormController, Phase, SubmitAction, SubmitResult, SubmitStart};
pub use validation::{FormErrors, FormField, FormValues, Rule, Schema};
