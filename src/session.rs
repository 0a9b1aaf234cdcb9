//! Per-connection frame sequencing.
//!
//! A session processes at most one frame at a time. A frame arriving while
//! another is in flight is dropped, and a session closed mid-frame abandons
//! that frame without emitting anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, info, trace};

use crate::pipeline::FramePipeline;
use crate::reference::ReferenceIndex;
use crate::result::MatchResult;

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    Closed,
}

impl SessionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => SessionState::Idle,
            PROCESSING => SessionState::Processing,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame ran to completion, emit this result.
    Completed(MatchResult),
    /// Another frame was in flight, this one was discarded unprocessed.
    Dropped,
    /// The session is closed, or was closed while the frame ran.
    Abandoned,
}

impl FrameOutcome {
    pub fn into_result(self) -> Option<MatchResult> {
        match self {
            FrameOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    reference_id: String,
    reference: Arc<ReferenceIndex>,
    pipeline: Arc<FramePipeline>,
    state: AtomicU8,
}

impl Session {
    pub fn new(
        reference_id: impl Into<String>,
        reference: Arc<ReferenceIndex>,
        pipeline: Arc<FramePipeline>,
    ) -> Self {
        let reference_id = reference_id.into();
        info!("session opened on reference {}", reference_id);
        Self {
            reference_id,
            reference,
            pipeline,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn reference(&self) -> &Arc<ReferenceIndex> {
        &self.reference
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Claims the session for one frame.
    ///
    /// Fails with [`FrameOutcome::Dropped`] while another frame is in
    /// flight and with [`FrameOutcome::Abandoned`] once closed.
    pub fn begin_frame(&self) -> Result<FrameSlot<'_>, FrameOutcome> {
        match self
            .state
            .compare_exchange(IDLE, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!("session {}: idle -> processing", self.reference_id);
                Ok(FrameSlot { session: self })
            }
            Err(PROCESSING) => {
                debug!("session {}: frame dropped, busy", self.reference_id);
                Err(FrameOutcome::Dropped)
            }
            Err(_) => Err(FrameOutcome::Abandoned),
        }
    }

    pub fn process_frame(&self, frame_bytes: &[u8]) -> FrameOutcome {
        match self.begin_frame() {
            Ok(slot) => slot.process(frame_bytes),
            Err(outcome) => outcome,
        }
    }

    /// Moves to `Closed` from any state. A frame in flight notices at its
    /// next stage boundary.
    pub fn close(&self) {
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        if previous != CLOSED {
            info!("session on reference {} closed", self.reference_id);
        }
    }
}

/// Exclusive right to run one frame on a session. Dropping it returns the
/// session to `Idle` unless it was closed meanwhile.
#[derive(Debug)]
pub struct FrameSlot<'a> {
    session: &'a Session,
}

impl FrameSlot<'_> {
    pub fn process(self, frame_bytes: &[u8]) -> FrameOutcome {
        let session = self.session;
        let is_cancelled = || session.is_closed();
        let result = session
            .pipeline
            .run(&session.reference, frame_bytes, &is_cancelled);
        drop(self);
        match result {
            Some(result) if !session.is_closed() => FrameOutcome::Completed(result),
            _ => {
                debug!("session {}: frame abandoned", session.reference_id);
                FrameOutcome::Abandoned
            }
        }
    }
}

impl Drop for FrameSlot<'_> {
    fn drop(&mut self) {
        let _ = self.session.state.compare_exchange(
            PROCESSING,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
