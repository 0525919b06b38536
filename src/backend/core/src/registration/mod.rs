//! Account registration on top of the job queue.
//!
//! The API validates a [`RegistrationRequest`] and submits it under
//! [`registration_key`]. [`RegistrationHandler`] then creates the account
//! through an [`AccountStore`] and sends the verification mail through a
//! [`Mailer`].

pub mod handler;
pub mod mailer;
pub mod request;
pub mod store;

pub use handler::{RegistrationHandler, RegistrationOutcome, RegistrationQueue};
pub use mailer::{LogMailer, Mailer, VerificationMail};
pub use request::{registration_key, RegistrationRequest};
pub use store::{token_digest, Account, AccountStore, InMemoryAccountStore, NewAccount};
