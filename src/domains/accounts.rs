//! User accounts aggregate.
//!
//! All accounts live under one storage key as a username-sorted map of salted
//! password hashes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::password::{generate_salt, hash_password, Password, PasswordError};
use crate::aggregate::{Aggregate, Rejection};

pub const ACCOUNTS_KEY: &str = "user-accounts";

pub const EMPTY_CREDENTIALS: &str = "Username or password cannot be empty";
pub const USERNAME_LENGTH: &str = "Username must be between 3 and 20 characters";
pub const PASSWORD_LENGTH: &str = "Password must be between 6 and 20 characters";
pub const USERNAME_TAKEN: &str = "Username already exists";

const USERNAME_CHARS: std::ops::RangeInclusive<usize> = 3..=20;
const PASSWORD_CHARS: std::ops::RangeInclusive<usize> = 6..=20;

/// Stored credentials of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub salt: String,
    pub hash: String,
}

impl AccountRecord {
    /// Hash a new password under a fresh salt.
    pub fn create(secret: &str) -> Self {
        let salt = generate_salt();
        let hash = hash_password(secret, &salt);
        Self { salt, hash }
    }

    /// Check a login attempt. Consumes the password.
    pub fn verify(&self, password: &mut Password) -> Result<bool, PasswordError> {
        let secret = password.take()?;
        Ok(hash_password(&secret, &self.salt) == self.hash)
    }
}

/// Projection: username -> credentials.
pub type AccountBook = BTreeMap<String, AccountRecord>;

#[derive(Debug)]
pub struct CommitAccount {
    pub request_id: Uuid,
    pub username: String,
    pub password: Password,
}

impl CommitAccount {
    pub fn new(request_id: Uuid, username: impl Into<String>, password: impl Into<Password>) -> Self {
        Self {
            request_id,
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A validated account, password already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub record: AccountRecord,
}

/// Emptiness and username length: the checks that need no stored state.
pub fn validate_username(username: &str, password: &Password) -> Result<(), Rejection> {
    let password_chars = password
        .char_count()
        .map_err(|e| Rejection::new(e.to_string()))?;

    if username.is_empty() || password_chars == 0 {
        return Err(Rejection::new(EMPTY_CREDENTIALS));
    }
    if !USERNAME_CHARS.contains(&username.chars().count()) {
        return Err(Rejection::new(USERNAME_LENGTH));
    }
    Ok(())
}

/// Full account rules against the current book.
///
/// Order: emptiness, username length, uniqueness, password length. Lengths
/// are counted in characters.
pub fn validate_new_account(
    book: &AccountBook,
    username: &str,
    password: &Password,
) -> Result<(), Rejection> {
    validate_username(username, password)?;
    if book.contains_key(username) {
        return Err(Rejection::new(USERNAME_TAKEN));
    }

    let password_chars = password
        .char_count()
        .map_err(|e| Rejection::new(e.to_string()))?;
    if !PASSWORD_CHARS.contains(&password_chars) {
        return Err(Rejection::new(PASSWORD_LENGTH));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct Accounts;

impl Aggregate for Accounts {
    type Projection = AccountBook;
    type Command = CommitAccount;
    type Mutation = NewAccount;

    fn storage_key(&self) -> &str {
        ACCOUNTS_KEY
    }

    fn request_id(command: &CommitAccount) -> Uuid {
        command.request_id
    }

    fn prepare(
        &self,
        projection: &AccountBook,
        command: &mut CommitAccount,
    ) -> Result<NewAccount, Rejection> {
        validate_new_account(projection, &command.username, &command.password)?;

        let secret = command
            .password
            .take()
            .map_err(|e| Rejection::new(e.to_string()))?;
        Ok(NewAccount {
            username: command.username.clone(),
            record: AccountRecord::create(&secret),
        })
    }

    fn apply(projection: &mut AccountBook, mutation: &NewAccount) -> Result<(), Rejection> {
        match projection.get(&mutation.username) {
            // Same salt and hash: our own earlier write whose ack was lost.
            Some(existing) if existing == &mutation.record => Ok(()),
            Some(_) => Err(Rejection::new(USERNAME_TAKEN)),
            None => {
                projection.insert(mutation.username.clone(), mutation.record.clone());
                Ok(())
            }
        }
    }
}
