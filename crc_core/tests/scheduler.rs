//! Sampling loop and scheduler lifecycle.
//!
//! `SamplingLoop` tests drive a `ManualClock` tick by tick; `Scheduler`
//! tests run the real thread on the system clock with short intervals.

use crc_core::listener::MonitorEvent;
use crc_core::mocks::{CollectingListener, FailingConnector};
use crc_core::protocol::encode_frame;
use crc_core::{
    BufferCfg, Dispatcher, Emulator, ExportTrigger, Isotope, ProtocolDriver, SamplingLoop,
    Scheduler, SchedulerState, Session, Settings, Tick,
};
use crc_hardware::{ScriptedConnector, ScriptedLink};
use crc_traits::{ManualClock, SystemClock};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn settings(interval: Duration) -> Settings {
    Settings {
        interval,
        wake: Duration::from_millis(100).min(interval),
        export: ExportTrigger::disabled(),
        ..Settings::default()
    }
}

fn sampling_loop(
    clock: &ManualClock,
    driver: ProtocolDriver,
    settings: Settings,
    collector: &CollectingListener,
) -> SamplingLoop<ManualClock> {
    let session = Session::new(BufferCfg::for_settings(&settings).capacity()).unwrap();
    let mut dispatcher = Dispatcher::new();
    dispatcher.add("collect", Box::new(collector.clone())).unwrap();
    dispatcher.start().unwrap();
    SamplingLoop::new(
        clock.clone(),
        driver,
        Arc::new(Mutex::new(settings)),
        Arc::new(Mutex::new(session)),
        dispatcher,
    )
}

fn finish(sampling: SamplingLoop<ManualClock>) {
    let (_, mut dispatcher) = sampling.into_parts();
    dispatcher.close();
}

#[test]
fn emulated_run_dispatches_one_record_per_interval() {
    let clock = ManualClock::new();
    let collector = CollectingListener::new();
    let mut sampling = sampling_loop(
        &clock,
        ProtocolDriver::emulated(Emulator::seeded(3)),
        settings(Duration::from_secs(2)),
        &collector,
    );
    // 20 simulated seconds at the default 100 ms wake
    for _ in 0..=200 {
        sampling.tick();
        clock.advance(Duration::from_millis(100));
    }
    finish(sampling);

    let records = collector.records();
    assert!((9..=11).contains(&records.len()), "{}", records.len());
    assert!(records.iter().all(|r| r.isotope == Isotope::Test));
    assert!(records.windows(2).all(|p| p[1].timestamp - p[0].timestamp == 2));

    // non-increasing modulo the 2.5 % noise
    let t0 = records[0].timestamp;
    for r in &records {
        let clean = 2.0 * 0.5f64.powf((r.timestamp - t0) as f64 / 300.0);
        assert!((r.activity / clean - 1.0).abs() < 0.2, "{r:?}");
    }
}

#[test]
fn interval_change_applies_on_next_wake() {
    let clock = ManualClock::new();
    let collector = CollectingListener::new();
    let shared = Arc::new(Mutex::new(settings(Duration::from_secs(10))));
    let session = Arc::new(Mutex::new(Session::new(64).unwrap()));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add("collect", Box::new(collector.clone())).unwrap();
    dispatcher.start().unwrap();
    let mut sampling = SamplingLoop::new(
        clock.clone(),
        ProtocolDriver::emulated(Emulator::seeded(9)),
        shared.clone(),
        session,
        dispatcher,
    );

    clock.advance(Duration::from_secs(5));
    assert_eq!(sampling.tick(), Tick::Idle);
    shared.lock().unwrap().interval = Duration::from_secs(2);
    assert!(matches!(sampling.tick(), Tick::Sampled(_)));
    finish(sampling);
}

#[test]
fn timeouts_escalate_to_reopen_after_threshold() {
    let clock = ManualClock::new();
    let link = ScriptedLink::new();
    let connector = ScriptedConnector::new(link.clone());
    let collector = CollectingListener::new();
    let mut s = settings(Duration::from_secs(1));
    s.retries = 1;
    s.reopen_after_timeouts = 3;
    let mut sampling = sampling_loop(
        &clock,
        ProtocolDriver::device(Box::new(link.clone()), 1),
        s,
        &collector,
    )
    .with_connector(Some(Box::new(connector.clone())));

    for poll in 1..=7 {
        clock.advance(Duration::from_secs(1));
        assert!(matches!(sampling.tick(), Tick::Skipped(_)), "poll {poll}");
        assert_eq!(connector.opens(), poll / 3);
    }
    assert_eq!(sampling.reopens(), 2);
    finish(sampling);
    assert_eq!(collector.with(|c| c.poll_errors.len()), 7);
}

#[test]
fn escalation_disabled_never_reopens() {
    let clock = ManualClock::new();
    let link = ScriptedLink::new();
    let connector = ScriptedConnector::new(link.clone());
    let collector = CollectingListener::new();
    let mut s = settings(Duration::from_secs(1));
    s.retries = 1;
    s.reopen_after_timeouts = 0;
    let mut sampling = sampling_loop(&clock, ProtocolDriver::device(Box::new(link), 1), s, &collector)
        .with_connector(Some(Box::new(connector.clone())));
    for _ in 0..25 {
        clock.advance(Duration::from_secs(1));
        sampling.tick();
    }
    assert_eq!(connector.opens(), 0);
    finish(sampling);
}

#[test]
fn failed_reopen_keeps_polling_old_link() {
    let clock = ManualClock::new();
    let link = ScriptedLink::new();
    let collector = CollectingListener::new();
    let mut s = settings(Duration::from_secs(1));
    s.retries = 1;
    s.reopen_after_timeouts = 2;
    let mut sampling = sampling_loop(
        &clock,
        ProtocolDriver::device(Box::new(link.clone()), 1),
        s,
        &collector,
    )
    .with_connector(Some(Box::new(FailingConnector)));
    for _ in 0..5 {
        clock.advance(Duration::from_secs(1));
        sampling.tick();
    }
    assert_eq!(sampling.reopens(), 0);
    assert!(!sampling.is_emulated());
    assert_eq!(link.writes(), 5);
    finish(sampling);
}

#[test]
fn newline_in_unsolicited_input_is_print_pressed() {
    let clock = ManualClock::new();
    let link = ScriptedLink::repeating(encode_frame("F 18", 5, 3.0));
    let collector = CollectingListener::new();
    let mut sampling = sampling_loop(
        &clock,
        ProtocolDriver::device(Box::new(link.clone()), 5),
        settings(Duration::from_secs(10)),
        &collector,
    );
    link.inject(b"partial");
    sampling.tick();
    link.inject(b"A0 2.9 GBq\r\n");
    sampling.tick();
    finish(sampling);
    let prints = collector.with(|c| c.prints.clone());
    assert_eq!(prints, vec![b"A0 2.9 GBq\r\n".to_vec()]);
}

#[test]
fn export_crossing_is_terminal() {
    let clock = ManualClock::new();
    let collector = CollectingListener::new();
    let mut s = settings(Duration::from_secs(10));
    // TST: 300 s half-life, 0.1 of it is 30 s
    s.export = ExportTrigger::new(0.1).unwrap();
    let mut sampling = sampling_loop(
        &clock,
        ProtocolDriver::emulated(Emulator::seeded(5)),
        s,
        &collector,
    );
    let mut ticks = Vec::new();
    for _ in 0..10 {
        clock.advance(Duration::from_secs(10));
        let t = sampling.tick();
        let done = t.is_terminal();
        ticks.push(t);
        if done {
            break;
        }
    }
    finish(sampling);
    // polls at 10..=50 s; a 30 s span equals the threshold, 40 s passes it
    let last = ticks.last().unwrap();
    let Tick::ExportRequested(signal) = last else {
        panic!("no export: {ticks:?}");
    };
    assert_eq!(signal.span_secs, 40);
    assert_eq!(collector.with(|c| c.exports.len()), 1);
    assert_eq!(collector.records().len(), 5);
}

#[test]
fn panicking_listener_does_not_starve_others() {
    struct Bomb;
    impl crc_core::Listener for Bomb {
        fn on_record(
            &mut self,
            _record: &crc_core::SampleRecord,
        ) -> Result<(), crc_traits::BoxError> {
            panic!("listener bug");
        }
    }

    let collector = CollectingListener::new();
    let mut dispatcher = Dispatcher::new();
    dispatcher.add("bomb", Box::new(Bomb)).unwrap();
    dispatcher.add("collect", Box::new(collector.clone())).unwrap();
    dispatcher.start().unwrap();
    let mut emu = Emulator::seeded(1);
    for ts in 0..5 {
        dispatcher.dispatch(&MonitorEvent::Record(emu.sample(ts)));
        std::thread::sleep(Duration::from_millis(5));
    }
    dispatcher.close();
    assert_eq!(collector.records().len(), 5);
    // the panicked listener is gone, the healthy one is kept for the next run
    assert_eq!(dispatcher.len(), 1);
}

#[test]
fn scheduler_stops_promptly_and_goes_quiet() {
    let s = Settings {
        interval: Duration::from_millis(200),
        wake: Duration::from_millis(20),
        ..settings(Duration::from_millis(200))
    };
    let mut scheduler = Scheduler::new(s.clone(), BufferCfg::for_settings(&s), SystemClock::new())
        .unwrap()
        .force_emulation()
        .with_emulator_seed(11);
    let collector = CollectingListener::new();
    scheduler.add_listener("collect", collector.clone()).unwrap();

    scheduler.start().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert!(scheduler.is_emulated());
    assert!(scheduler.start().is_err());
    std::thread::sleep(Duration::from_millis(1_300));

    let t = Instant::now();
    scheduler.stop();
    assert!(t.elapsed() < Duration::from_millis(500), "{:?}", t.elapsed());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let seen = collector.records().len();
    assert!(seen >= 1, "no records");
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(collector.records().len(), seen);

    // listeners survive a restart
    scheduler.start().unwrap();
    std::thread::sleep(Duration::from_millis(1_000));
    scheduler.stop();
    assert!(collector.records().len() > seen);
}

#[test]
fn unopenable_device_falls_back_to_emulation() {
    let s = settings(Duration::from_secs(1));
    let mut scheduler = Scheduler::new(s.clone(), BufferCfg::for_settings(&s), SystemClock::new())
        .unwrap()
        .with_connector(FailingConnector);
    scheduler.start().unwrap();
    assert!(scheduler.is_emulated());
    scheduler.stop();
}

#[test]
fn silent_device_fails_self_test_and_emulates() {
    let link = ScriptedLink::new();
    let connector = ScriptedConnector::new(link.clone());
    let mut s = settings(Duration::from_secs(1));
    s.retries = 2;
    let mut scheduler = Scheduler::new(s.clone(), BufferCfg::for_settings(&s), SystemClock::new())
        .unwrap()
        .with_connector(connector.clone());
    scheduler.start().unwrap();
    assert!(scheduler.is_emulated());
    scheduler.stop();
    assert_eq!(link.writes(), 2);
}

#[test]
fn responsive_device_is_used() {
    let link = ScriptedLink::repeating(encode_frame("F 18", 5, 2.5));
    let connector = ScriptedConnector::new(link.clone());
    let s = settings(Duration::from_secs(1));
    let mut scheduler = Scheduler::new(s.clone(), BufferCfg::for_settings(&s), SystemClock::new())
        .unwrap()
        .with_connector(connector.clone());
    scheduler.start().unwrap();
    assert!(!scheduler.is_emulated());
    scheduler.stop();
    assert_eq!(connector.opens(), 1);
}

#[test]
fn scheduler_stops_itself_after_export() {
    let s = Settings {
        interval: Duration::from_millis(100),
        wake: Duration::from_millis(10),
        // TST half-life 300 s: fires once the window spans more than 0.3 s
        export: ExportTrigger::new(0.001).unwrap(),
        ..Settings::default()
    };
    let mut scheduler = Scheduler::new(s.clone(), BufferCfg::for_settings(&s), SystemClock::new())
        .unwrap()
        .force_emulation();
    let collector = CollectingListener::new();
    scheduler.add_listener("collect", collector.clone()).unwrap();
    scheduler.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while scheduler.state() == SchedulerState::Running && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    scheduler.stop();
    assert_eq!(collector.with(|c| c.exports.len()), 1);
}

#[test]
fn setters_reject_invalid_values_and_keep_old() {
    let s = settings(Duration::from_secs(10));
    let scheduler = Scheduler::new(s, BufferCfg::default(), SystemClock::new()).unwrap();
    assert!(scheduler.set_interval(Duration::ZERO).is_err());
    assert!(scheduler.set_interval(Duration::from_millis(10)).is_err());
    assert!(scheduler.set_window_minutes(-1.0).is_err());
    assert!(scheduler.set_tolerance(1.5).is_err());
    assert!(scheduler.set_export_threshold(-0.25).is_err());
    let kept = scheduler.settings();
    assert_eq!(kept.interval, Duration::from_secs(10));
    assert!((kept.tolerance - 0.05).abs() < f64::EPSILON);

    scheduler.set_interval(Duration::from_secs(2)).unwrap();
    scheduler.set_window_minutes(60.0).unwrap();
    scheduler.set_tolerance(0.1).unwrap();
    scheduler.set_export_threshold(0.5).unwrap();
    let s = scheduler.settings();
    assert_eq!(s.interval, Duration::from_secs(2));
    assert!((s.window_min - 60.0).abs() < f64::EPSILON);
    assert!((s.export.threshold() - 0.5).abs() < f64::EPSILON);
    assert!(scheduler.report().is_none());
}

#[test]
fn setters_reject_windows_past_buffer_capacity() {
    let s = Settings {
        window_min: 30.0,
        ..settings(Duration::from_secs(10))
    };
    let buffer = BufferCfg {
        max_window_min: 60.0,
        min_interval_s: 5.0,
        slack: 1,
    };
    assert_eq!(buffer.capacity(), 721);
    let scheduler = Scheduler::new(s, buffer, SystemClock::new()).unwrap();

    // 30 min at 2 s needs 901 samples
    assert!(scheduler.set_interval(Duration::from_secs(2)).is_err());
    assert_eq!(scheduler.settings().interval, Duration::from_secs(10));
    // 120 min at 10 s needs 721
    scheduler.set_window_minutes(120.0).unwrap();
    // 121 min at 10 s needs 727
    assert!(scheduler.set_window_minutes(121.0).is_err());
    assert!((scheduler.settings().window_min - 120.0).abs() < f64::EPSILON);

    scheduler.set_window_minutes(30.0).unwrap();
    scheduler.set_interval(Duration::from_secs(5)).unwrap();
    assert_eq!(scheduler.settings().interval, Duration::from_secs(5));
}
