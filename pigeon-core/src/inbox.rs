//! Inbox cursor tracking: fetch entries after the last processed cursor, skip duplicates,
//! dispatch verified envelopes, acknowledge what was observed.

use tracing::{debug, info, warn};

use crate::core::{ExchangeError, MessageExchange};
use crate::dispatch::{Dispatch, DispatchError, Dispatcher};
use crate::identity;
use crate::session::PairingState;
use crate::wire;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    /// Entries decrypted and handed to the dispatcher.
    pub dispatched: usize,
    /// Malformed, unverifiable or dropped entries.
    pub skipped: usize,
    /// Cursors acknowledged to the server, in inbox order.
    pub acked: Vec<String>,
    /// The batch stopped early because no pairing session matched a sender.
    pub aborted: bool,
}

impl MessageExchange {
    /// One poll cycle. Cursors are acknowledged in one call after the loop and the last one
    /// persisted only once the ack went through; on error nothing is acknowledged.
    pub fn retrieve_messages(&mut self) -> Result<PollReport, ExchangeError> {
        let last_cursor = self.host.store.get_last_cursor()?;
        let entries = self.host.transport.fetch_inbox(last_cursor.as_deref())?;
        let mut report = PollReport {
            fetched: entries.len(),
            ..Default::default()
        };
        debug!(count = entries.len(), last_cursor = ?last_cursor, "inbox fetched");

        let mut cursors = Vec::new();
        for entry in &entries {
            let envelope = match entry.decode_envelope() {
                Ok(e) => e,
                Err(e) => {
                    warn!(cursor = %entry.cursor, error = %e, "skipping malformed inbox entry");
                    report.skipped += 1;
                    continue;
                }
            };
            let Some(session) = self.resolve_session(&envelope.sender_public_key)? else {
                warn!(cursor = %entry.cursor, "no pairing session for sender, stopping batch");
                report.aborted = true;
                break;
            };
            cursors.push(entry.cursor.clone());

            if last_cursor.as_deref() == Some(entry.cursor.as_str()) {
                debug!(cursor = %entry.cursor, "already processed, acknowledging only");
                report.skipped += 1;
                continue;
            }
            // TODO: decide whether a bad signature from a paired sender should stop the batch
            // like a missing session does; for now it is skipped.
            if !identity::verify_envelope(&envelope) {
                warn!(cursor = %entry.cursor, "signature verification failed");
                report.skipped += 1;
                continue;
            }
            if self.state() != PairingState::Paired {
                warn!(cursor = %entry.cursor, state = ?self.state(), "pairing not approved, dropping envelope");
                report.skipped += 1;
                continue;
            }

            let pairing_key = self.pairing_key(&session)?;
            let dispatcher = Dispatcher::new(
                &session,
                &pairing_key,
                self.host.wallets.as_ref(),
                &self.config.device_id,
            );
            let kind = match dispatcher.accepts(&envelope) {
                Ok(kind) => kind,
                Err(rejection) => {
                    warn!(cursor = %entry.cursor, %rejection, "dropping envelope");
                    report.skipped += 1;
                    continue;
                }
            };
            let plaintext = identity::decrypt_envelope(&pairing_key, &envelope)?;
            report.dispatched += 1;
            let outcome = match dispatcher.dispatch(kind, &envelope, &plaintext) {
                Ok(outcome) => outcome,
                Err(DispatchError::Payload { kind, source }) => {
                    warn!(cursor = %entry.cursor, %kind, error = %source, "malformed payload");
                    continue;
                }
                Err(DispatchError::Crypto(e)) => return Err(e.into()),
            };
            match outcome {
                Dispatch::Respond(response) => {
                    debug!(cursor = %entry.cursor, kind = %response.message_type, "sending response");
                    self.host.transport.send_envelope(&wire::encode(&response))?;
                }
                Dispatch::LinkConfirmed => self.confirm_pairing(&session)?,
                Dispatch::Ignored => {}
            }
        }

        if let Some(last) = cursors.last() {
            self.host.transport.send_ack(&cursors)?;
            self.host.store.put_last_cursor(last)?;
            info!(count = cursors.len(), last = %last, "inbox acknowledged");
        }
        report.acked = cursors;
        Ok(report)
    }
}
