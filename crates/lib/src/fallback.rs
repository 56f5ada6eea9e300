//! Catch-and-degrade helpers for features that call the gateway.
//!
//! A feature passes its real gateway call and a local substitute; any failure, or an unavailable
//! gateway, yields the substitute. Failures are logged at debug and never reach the caller.

use crate::connection::ConnectionManager;
use crate::error::ServiceError;
use crate::gateway::{ChatOptions, Message};
use std::fmt::Display;
use std::future::Future;

/// Await `primary`; on error return `fallback()`.
pub async fn attempt<T, E, P, F>(primary: P, fallback: F) -> T
where
    E: Display,
    P: Future<Output = Result<T, E>>,
    F: FnOnce() -> T,
{
    match primary.await {
        Ok(v) => v,
        Err(e) => {
            log::debug!("gateway call failed, using fallback: {}", e);
            fallback()
        }
    }
}

/// Like [`attempt`], but `primary` is never polled when `available` is false.
pub async fn attempt_when<T, E, P, F>(available: bool, primary: P, fallback: F) -> T
where
    E: Display,
    P: Future<Output = Result<T, E>>,
    F: FnOnce() -> T,
{
    if !available {
        log::debug!("gateway unavailable, using fallback");
        return fallback();
    }
    attempt(primary, fallback).await
}

/// One-shot prompt: the gateway's reply text, or `fallback()` when unavailable, failing, or empty.
pub async fn ask_or_else<F>(
    manager: &ConnectionManager,
    system: &str,
    prompt: &str,
    fallback: F,
) -> String
where
    F: FnOnce() -> String,
{
    let messages = [Message::system(system), Message::user(prompt)];
    let reply = manager
        .attempt(
            async {
                let res = manager
                    .client()
                    .chat(&messages, ChatOptions::default())
                    .await?;
                Ok::<_, ServiceError>(
                    Some(res.content().trim().to_string()).filter(|s| !s.is_empty()),
                )
            },
            || None,
        )
        .await;
    reply.unwrap_or_else(fallback)
}
