//! Integration tests for pipeline state changes: preroll, live sources and
//! failure propagation.

use mediaflow::elements::{AppSink, AppSrc};
use mediaflow::error::StateChangeError;
use mediaflow::prelude::*;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Element that refuses one transition.
struct Refuse(StateChange);

impl ElementImpl for Refuse {
    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
        if transition == self.0 {
            Err(StateChangeError)
        } else {
            Ok(StateChangeSuccess::Success)
        }
    }
}

/// Without data the sink cannot preroll, so the pipeline stays in READY
/// with PAUSED pending.
#[test]
fn test_sink_without_data_never_prerolls() {
    let pipeline = parse_launch("appsrc ! appsink").unwrap();
    assert_eq!(
        pipeline.set_state(State::Playing),
        Ok(StateChangeSuccess::Async)
    );

    let (result, current, pending) = pipeline.get_state(Some(Duration::from_secs(1)));
    assert_eq!(result, Ok(StateChangeSuccess::Async));
    assert_eq!(current, State::Ready);
    assert_eq!(pending, Some(State::Paused));

    assert_eq!(
        pipeline.set_state(State::Null),
        Ok(StateChangeSuccess::Success)
    );
    assert_eq!(pipeline.current_state(), State::Null);
}

/// The first buffer completes preroll and the pipeline continues to PLAYING.
#[test]
fn test_first_buffer_completes_preroll() {
    let pipeline = Pipeline::new("pipeline");
    let appsrc = AppSrc::new();
    let input = appsrc.handle();
    let src = appsrc.into_element("src");
    let appsink = AppSink::new();
    let output = appsink.handle();
    let sink = appsink.into_element("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    assert_eq!(
        pipeline.set_state(State::Paused),
        Ok(StateChangeSuccess::Async)
    );
    input.push_buffer(Buffer::from_slice(b"first")).unwrap();
    let (result, current, _) = pipeline.get_state(Some(TIMEOUT));
    assert_eq!(result, Ok(StateChangeSuccess::Success));
    assert_eq!(current, State::Paused);
    assert_eq!(output.pull_preroll().unwrap().data(), b"first");

    pipeline.set_state(State::Playing).unwrap();
    let (_, current, _) = pipeline.get_state(Some(TIMEOUT));
    assert_eq!(current, State::Playing);
    assert_eq!(output.try_pull_buffer(TIMEOUT).unwrap().data(), b"first");
    pipeline.set_state(State::Null).unwrap();
}

/// A live source makes PAUSED a no-preroll state.
#[test]
fn test_live_source_skips_preroll() {
    let pipeline = Pipeline::new("pipeline");
    let appsrc = AppSrc::new().live();
    let input = appsrc.handle();
    let src = appsrc.into_element("src");
    let appsink = AppSink::new();
    let output = appsink.handle();
    let sink = appsink.into_element("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    assert_eq!(
        pipeline.set_state(State::Paused),
        Ok(StateChangeSuccess::NoPreroll)
    );
    assert_eq!(pipeline.current_state(), State::Paused);

    pipeline.set_state(State::Playing).unwrap();
    input.push_buffer(Buffer::from_slice(b"live")).unwrap();
    assert_eq!(output.try_pull_buffer(TIMEOUT).unwrap().data(), b"live");
    let (result, current, _) = pipeline.get_state(Some(TIMEOUT));
    assert!(result.is_ok());
    assert_eq!(current, State::Playing);
    pipeline.set_state(State::Null).unwrap();
}

/// A child failing PAUSED→PLAYING fails the pipeline; its sibling stays
/// in PAUSED.
#[test]
fn test_failing_child_fails_pipeline() {
    let pipeline = Pipeline::new("pipeline");
    let bad = Element::new("bad", Refuse(StateChange::PausedToPlaying));
    let good = Element::new("good", Refuse(StateChange::ReadyToNull));
    pipeline.add_many(&[&bad, &good]).unwrap();

    assert_eq!(
        pipeline.set_state(State::Paused),
        Ok(StateChangeSuccess::Success)
    );
    assert_eq!(pipeline.set_state(State::Playing), Err(StateChangeError));
    assert_eq!(pipeline.current_state(), State::Paused);
    assert_eq!(bad.current_state(), State::Paused);
    assert_eq!(good.current_state(), State::Paused);
}

/// State changes are reported on the bus, from the pipeline itself too.
#[test]
fn test_state_changes_are_posted() {
    let pipeline = parse_launch("datasrc num-buffers=1 ! nullsink").unwrap();
    pipeline.set_state(State::Playing).unwrap();
    let bus = pipeline.bus().unwrap();

    let mut reached_playing = false;
    while let Some(msg) = bus.timed_pop_filtered(Some(TIMEOUT), MessageType::STATE_CHANGED) {
        if let MessageView::StateChanged { current, .. } = msg.view() {
            if msg.src() == Some("pipeline") && *current == State::Playing {
                reached_playing = true;
                break;
            }
        }
    }
    assert!(reached_playing);
    pipeline.set_state(State::Null).unwrap();
}
