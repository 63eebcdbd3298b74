//! Background tasks for the callbridge server.
//!
//! Includes:
//! - Writing off voicemail calls whose recording callback never arrived.

use std::sync::Arc;
use std::time::Duration;

use callbridge_types::CallState;
use tokio::time::sleep;

use crate::AppState;

/// Settles every call that has been recording a voicemail for longer than
/// `deadline` as `Failed` / `voicemail_abandoned`. Returns how many calls
/// were settled.
pub async fn sweep_abandoned_voicemails(state: &AppState, deadline: Duration) -> usize {
    let mut settled = 0;
    for session in state.calls.stuck_in(CallState::VoicemailRecording, deadline) {
        tracing::warn!(
            call_sid = %session.call_sid(),
            waited_secs = session.time_in_state().as_secs(),
            "no recording arrived for voicemail call"
        );
        if state
            .calls
            .settle(&state.pool, &session, CallState::Failed, "voicemail_abandoned")
            .await
        {
            settled += 1;
        }
    }
    settled
}

/// Starts the voicemail sweep.
///
/// A voicemail call is abandoned once `voicemail_max_secs` plus
/// `voicemail_grace_secs` have passed without a recording callback, as
/// happens when the caller hangs up before the beep.
pub async fn start_voicemail_sweep(state: Arc<AppState>) {
    let telephony = &state.config.telephony;
    let deadline = Duration::from_secs(
        telephony.voicemail_max_secs as u64 + telephony.voicemail_grace_secs,
    );
    let interval = Duration::from_secs((deadline.as_secs() / 4).clamp(1, 60));

    tracing::info!(
        deadline_secs = deadline.as_secs(),
        interval_secs = interval.as_secs(),
        "starting voicemail sweep"
    );

    loop {
        sleep(interval).await;
        let settled = sweep_abandoned_voicemails(&state, deadline).await;
        if settled > 0 {
            tracing::info!(count = settled, "settled abandoned voicemail calls");
        }
    }
}
