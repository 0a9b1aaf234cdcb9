mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use image::{GrayImage, Luma};
use puzzle_locator::config::ExtractorParams;
use puzzle_locator::pipeline::INVALID_FRAME;
use puzzle_locator::{
    FrameOutcome, FramePipeline, InMemoryReferenceStore, LocatorConfig, MatchResult,
    ReferenceIndex, ReferenceRegistry, Session, SessionState,
};

use common::{encode_png, piece_frame, textured_image};

fn session() -> (Session, GrayImage) {
    let reference = textured_image(480, 360, 400, 31);
    let index = ReferenceIndex::build(&reference, &ExtractorParams::default()).unwrap();
    let pipeline = FramePipeline::new(LocatorConfig::default());
    (
        Session::new("ref01", Arc::new(index), Arc::new(pipeline)),
        reference,
    )
}

#[test]
fn test_idle_processing_idle() {
    let (session, reference) = session();
    assert_eq!(session.state(), SessionState::Idle);
    let frame = piece_frame(&reference, [150, 100, 140, 140], 30.0);
    let outcome = session.process_frame(&frame);
    let result = outcome.into_result().unwrap();
    assert_eq!(result.piece_detected(), Some(true));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_frame_during_processing_is_dropped() {
    let (session, reference) = session();
    let frame_a = piece_frame(&reference, [150, 100, 140, 140], 30.0);
    let frame_b = encode_png(&GrayImage::from_pixel(200, 200, Luma([240])));

    let slot = session.begin_frame().unwrap();
    assert_eq!(session.state(), SessionState::Processing);
    assert_eq!(session.process_frame(&frame_b), FrameOutcome::Dropped);

    let emitted: Vec<_> = [slot.process(&frame_a)]
        .into_iter()
        .filter_map(FrameOutcome::into_result)
        .collect();
    assert_eq!(emitted.len(), 1);
    // the result is A's: B was a blank frame with nothing to detect
    assert_eq!(emitted[0].piece_detected(), Some(true));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_closed_session_abandons_frames() {
    let (session, reference) = session();
    let frame = piece_frame(&reference, [150, 100, 140, 140], 30.0);

    let slot = session.begin_frame().unwrap();
    session.close();
    assert_eq!(slot.process(&frame), FrameOutcome::Abandoned);
    assert_eq!(session.state(), SessionState::Closed);

    assert_eq!(session.process_frame(&frame), FrameOutcome::Abandoned);
    assert!(session.begin_frame().is_err());
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_invalid_frame_keeps_session_open() {
    let (session, _) = session();
    let result = session
        .process_frame(b"\xff\xd8 truncated jpeg")
        .into_result()
        .unwrap();
    assert_eq!(result.error(), Some(INVALID_FRAME));
    assert_eq!(result.piece_detected(), Some(false));
    assert!(result.matches().is_empty());
    assert_eq!(session.state(), SessionState::Idle);

    let blank = encode_png(&GrayImage::from_pixel(200, 200, Luma([240])));
    let next = session.process_frame(&blank).into_result().unwrap();
    assert_eq!(next.error(), None);
}

#[test]
fn test_dropped_slot_returns_to_idle() {
    let (session, _) = session();
    {
        let _slot = session.begin_frame().unwrap();
        assert_eq!(session.state(), SessionState::Processing);
    }
    assert_eq!(session.state(), SessionState::Idle);
}

fn without_time(result: &MatchResult) -> serde_json::Value {
    let mut value = serde_json::to_value(result).unwrap();
    value.as_object_mut().unwrap().remove("processingTime");
    value
}

#[test]
fn test_one_frame_in_flight_across_threads() {
    let (session, reference) = session();
    let session = Arc::new(session);
    let frame = Arc::new(piece_frame(&reference, [150, 100, 140, 140], 30.0));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let session = Arc::clone(&session);
            let frame = Arc::clone(&frame);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                session.process_frame(&frame)
            })
        })
        .collect();
    let outcomes: Vec<FrameOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, FrameOutcome::Completed(_) | FrameOutcome::Dropped))
    );
    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, FrameOutcome::Completed(_)))
    );
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_sessions_sharing_a_reference_run_in_parallel() {
    let reference = textured_image(480, 360, 400, 31);
    let registry = ReferenceRegistry::new(InMemoryReferenceStore::new(), LocatorConfig::default());
    let info = registry.register("shared", &encode_png(&reference)).unwrap();
    let frames = [
        piece_frame(&reference, [150, 100, 140, 140], 30.0),
        piece_frame(&reference, [40, 180, 120, 120], 200.0),
    ];

    let expected: Vec<_> = frames
        .iter()
        .map(|frame| {
            let session = registry.open_session(&info.id).unwrap();
            without_time(&session.process_frame(frame).into_result().unwrap())
        })
        .collect();

    let sessions = [
        registry.open_session(&info.id).unwrap(),
        registry.open_session(&info.id).unwrap(),
    ];
    assert!(Arc::ptr_eq(sessions[0].reference(), sessions[1].reference()));

    let got: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = sessions
            .iter()
            .zip(frames.iter())
            .map(|(session, frame)| scope.spawn(move || session.process_frame(frame)))
            .collect();
        handles
            .into_iter()
            .map(|h| without_time(&h.join().unwrap().into_result().unwrap()))
            .collect()
    });
    assert_eq!(got, expected);
    for session in &sessions {
        assert_eq!(session.state(), SessionState::Idle);
    }
}
