//! Application context: startup sequencing, the consumer poll loop,
//! Set-Report delivery and link notifications.
//!
//! One [`Application`] owns every collaborator, the link state machine and
//! the report dispatcher. Producers share only the [`EventQueue`].

use crate::config::PairingConfig;
use crate::error::{QueueFull, StartupError};
use crate::event::{Event, AUDIO_START, AUDIO_STOP, USER_PAYLOAD_LEN};
use crate::indicator::{Indicator, Led, LedMode};
use crate::link::{LinkActions, LinkStateMachine};
use crate::queue::EventQueue;
use crate::report::{ReportDispatcher, ReportType, Route};
use crate::subsystem::{Audio, Battery, KeyScan, Ota, Subsystem, Transport};

/// Handler for [`Event::UserDefine`] payloads: `(stamp, data)`.
pub type UserHandler = fn(u32, &[u8; USER_PAYLOAD_LEN]);

/// The collaborators coordinated by the application.
pub struct Subsystems<B, O, K, A, T> {
    pub battery: B,
    pub ota: O,
    pub keys: K,
    pub audio: A,
    pub transport: T,
}

pub struct Application<'q, B, O, K, A, T, I> {
    queue: &'q EventQueue,
    battery: B,
    ota: O,
    keys: K,
    audio: A,
    transport: T,
    indicator: I,
    link: LinkStateMachine,
    reports: ReportDispatcher,
    user_handler: Option<UserHandler>,
    started: bool,
    drops_seen: u32,
}

/// Routes link state machine outputs to the indicator and the transport.
struct LinkOutputs<'a, T, I> {
    transport: &'a mut T,
    indicator: &'a mut I,
}

impl<T: Transport, I: Indicator> LinkActions for LinkOutputs<'_, T, I> {
    fn indicate(&mut self, led: Led, mode: LedMode) {
        self.indicator.set(led, mode);
    }

    fn request_pairing(&mut self) {
        self.transport.enter_pairing();
    }
}

impl<'q, B, O, K, A, T, I> Application<'q, B, O, K, A, T, I>
where
    B: Battery,
    O: Ota,
    K: KeyScan,
    A: Audio,
    T: Transport,
    I: Indicator,
{
    pub fn new(
        queue: &'q EventQueue,
        subsystems: Subsystems<B, O, K, A, T>,
        indicator: I,
        pairing: PairingConfig,
    ) -> Self {
        let Subsystems {
            battery,
            ota,
            keys,
            audio,
            transport,
        } = subsystems;

        Self {
            queue,
            battery,
            ota,
            keys,
            audio,
            transport,
            indicator,
            link: LinkStateMachine::new(pairing),
            reports: ReportDispatcher::new(),
            user_handler: None,
            started: false,
            drops_seen: queue.dropped(),
        }
    }

    /// Initialise every collaborator and enable the consumer loop.
    ///
    /// Order: battery, OTA, key scan, audio, transport. The transport goes
    /// last because it starts delivering notifications and Set-Reports.
    /// Stops at the first failure.
    pub fn start(&mut self) -> Result<(), StartupError> {
        if self.started {
            debug!("Application already started");
            return Ok(());
        }

        init(&mut self.battery)?;
        init(&mut self.ota)?;
        init(&mut self.keys)?;
        init(&mut self.audio)?;
        init(&mut self.transport)?;

        self.started = true;
        info!("Application started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Register the handler for `UserDefine` events.
    pub fn on_user_event(&mut self, handler: UserHandler) {
        self.user_handler = Some(handler);
    }

    /// Enqueue an event on behalf of a producer.
    pub fn queue_event(&self, event: Event) -> Result<(), QueueFull> {
        self.queue.enqueue(event).map_err(|e| {
            warn!("Event queue full, dropped {}", event);
            e
        })
    }

    /// Consumer entry point; call once per scheduling slot.
    ///
    /// Handles at most one queue's worth of events so a busy producer
    /// cannot hold the consumer forever, then re-evaluates the pairing
    /// combo at `now` (ms). Returns the number of events handled; always 0
    /// before [`start`](Self::start) succeeded.
    pub fn poll(&mut self, now: u32) -> usize {
        if !self.started {
            return 0;
        }

        let mut handled = 0;
        while handled < self.queue.capacity() {
            let Some(event) = self.queue.dequeue() else {
                break;
            };
            self.process(&event);
            handled += 1;
        }

        let dropped = self.queue.dropped();
        if dropped != self.drops_seen {
            warn!(
                "Event queue overflowed, {} events lost",
                dropped.wrapping_sub(self.drops_seen)
            );
            self.drops_seen = dropped;
            self.keys.release_all();
            self.link.release_all(now);
        }

        self.link.poll(
            now,
            &mut LinkOutputs {
                transport: &mut self.transport,
                indicator: &mut self.indicator,
            },
        );

        handled
    }

    fn process(&mut self, event: &Event) {
        match *event {
            Event::Key { .. } | Event::ButtonStateChange { .. } => {
                self.keys.handle_event(event);
                self.link.on_key_event(
                    event,
                    &mut LinkOutputs {
                        transport: &mut self.transport,
                        indicator: &mut self.indicator,
                    },
                );
            }
            Event::Info { code, .. } => match code {
                AUDIO_START => {
                    self.indicator.set(Led::Error, LedMode::On);
                    self.audio.handle_event(event);
                }
                AUDIO_STOP => {
                    self.indicator.set(Led::Error, LedMode::Off);
                    self.audio.handle_event(event);
                }
                _ => debug!("Ignoring info event {=u8:#x}", code),
            },
            Event::Any { .. } => self.audio.handle_event(event),
            Event::UserDefine { data, stamp } => match self.user_handler {
                Some(handler) => handler(stamp, &data),
                None => debug!("No handler for user event"),
            },
        }
    }

    /// Inbound Set-Report from the host.
    ///
    /// Forwards the payload to the addressed collaborator; unroutable and
    /// malformed reports are counted by the dispatcher and dropped.
    pub fn set_report(
        &mut self,
        report_type: ReportType,
        report_id: u8,
        payload: &[u8],
        payload_len: u16,
    ) {
        let Ok((route, data)) = self
            .reports
            .resolve(report_type, report_id, payload, payload_len)
        else {
            return;
        };

        match route {
            Route::KeyboardLed => self.keys.set_keyboard_led(data),
            Route::AudioData | Route::AudioControl => {
                self.audio.set_report(report_type, report_id, data)
            }
            Route::CountControl => self.battery.count_control(data),
        }
    }

    /// Link state notification from the transport.
    pub fn transport_state_changed(&mut self, new_state: u32) {
        let classified = self.transport.classify(new_state);
        self.link.transport_state_changed(
            new_state,
            classified,
            &mut LinkOutputs {
                transport: &mut self.transport,
                indicator: &mut self.indicator,
            },
        );
    }

    pub fn link(&self) -> &LinkStateMachine {
        &self.link
    }

    pub fn reports(&self) -> &ReportDispatcher {
        &self.reports
    }

    pub fn queue(&self) -> &'q EventQueue {
        self.queue
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn indicator_mut(&mut self) -> &mut I {
        &mut self.indicator
    }

    pub fn battery(&self) -> &B {
        &self.battery
    }

    pub fn ota(&self) -> &O {
        &self.ota
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn init<S: Subsystem>(subsystem: &mut S) -> Result<(), StartupError> {
    subsystem.init().map_err(|code| {
        error!("{} failed to initialise (code {})", S::ID, code);
        StartupError {
            subsystem: S::ID,
            code,
        }
    })?;
    debug!("{} initialised", S::ID);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONNECT_INDEX, LINK_PAIRING_BLINK_PERIOD_MS};
    use crate::event::ANY_PAYLOAD_LEN;
    use crate::link::{raw, LinkState};
    use crate::report::{feature, output};
    use crate::subsystem::SubsystemId;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    type InitLog = Rc<RefCell<Vec<SubsystemId>>>;

    macro_rules! fake_subsystem {
        ($name:ident, $id:expr) => {
            impl Subsystem for $name {
                const ID: SubsystemId = $id;

                fn init(&mut self) -> Result<(), u32> {
                    self.log.borrow_mut().push(Self::ID);
                    match self.fail {
                        Some(code) => Err(code),
                        None => Ok(()),
                    }
                }
            }
        };
    }

    #[derive(Default)]
    struct FakeBattery {
        log: InitLog,
        fail: Option<u32>,
        count_control: Vec<Vec<u8>>,
    }
    fake_subsystem!(FakeBattery, SubsystemId::Battery);
    impl Battery for FakeBattery {
        fn count_control(&mut self, payload: &[u8]) {
            self.count_control.push(payload.to_vec());
        }
    }

    #[derive(Default)]
    struct FakeOta {
        log: InitLog,
        fail: Option<u32>,
    }
    fake_subsystem!(FakeOta, SubsystemId::Ota);
    impl Ota for FakeOta {}

    #[derive(Default)]
    struct FakeKeys {
        log: InitLog,
        fail: Option<u32>,
        events: Vec<Event>,
        leds: Vec<Vec<u8>>,
        releases: usize,
    }
    fake_subsystem!(FakeKeys, SubsystemId::KeyScan);
    impl KeyScan for FakeKeys {
        fn handle_event(&mut self, event: &Event) {
            self.events.push(*event);
        }

        fn set_keyboard_led(&mut self, payload: &[u8]) {
            self.leds.push(payload.to_vec());
        }

        fn release_all(&mut self) {
            self.releases += 1;
        }
    }

    #[derive(Default)]
    struct FakeAudio {
        log: InitLog,
        fail: Option<u32>,
        events: Vec<Event>,
        reports: Vec<(ReportType, u8, Vec<u8>)>,
    }
    fake_subsystem!(FakeAudio, SubsystemId::Audio);
    impl Audio for FakeAudio {
        fn handle_event(&mut self, event: &Event) {
            self.events.push(*event);
        }

        fn set_report(&mut self, report_type: ReportType, report_id: u8, payload: &[u8]) {
            self.reports.push((report_type, report_id, payload.to_vec()));
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        log: InitLog,
        fail: Option<u32>,
        pairing_requests: usize,
    }
    fake_subsystem!(FakeTransport, SubsystemId::Transport);
    impl Transport for FakeTransport {
        fn enter_pairing(&mut self) {
            self.pairing_requests += 1;
        }
    }

    #[derive(Default)]
    struct FakeLeds(Vec<(Led, LedMode)>);
    impl Indicator for FakeLeds {
        fn set(&mut self, led: Led, mode: LedMode) {
            self.0.push((led, mode));
        }
    }

    type TestApp<'q> =
        Application<'q, FakeBattery, FakeOta, FakeKeys, FakeAudio, FakeTransport, FakeLeds>;

    fn subsystems(log: &InitLog) -> Subsystems<FakeBattery, FakeOta, FakeKeys, FakeAudio, FakeTransport> {
        Subsystems {
            battery: FakeBattery {
                log: log.clone(),
                ..Default::default()
            },
            ota: FakeOta {
                log: log.clone(),
                ..Default::default()
            },
            keys: FakeKeys {
                log: log.clone(),
                ..Default::default()
            },
            audio: FakeAudio {
                log: log.clone(),
                ..Default::default()
            },
            transport: FakeTransport {
                log: log.clone(),
                ..Default::default()
            },
        }
    }

    fn started(queue: &EventQueue) -> TestApp<'_> {
        let log = InitLog::default();
        let mut app = Application::new(
            queue,
            subsystems(&log),
            FakeLeds::default(),
            PairingConfig::default(),
        );
        app.start().unwrap();
        app
    }

    #[test]
    fn start_initialises_in_dependency_order() {
        let queue = EventQueue::new();
        let log = InitLog::default();
        let mut app = Application::new(
            &queue,
            subsystems(&log),
            FakeLeds::default(),
            PairingConfig::default(),
        );
        assert!(!app.is_started());
        app.start().unwrap();
        assert!(app.is_started());
        assert_eq!(
            *log.borrow(),
            [
                SubsystemId::Battery,
                SubsystemId::Ota,
                SubsystemId::KeyScan,
                SubsystemId::Audio,
                SubsystemId::Transport,
            ]
        );

        // A second start is a no-op.
        app.start().unwrap();
        assert_eq!(log.borrow().len(), 5);
    }

    #[test]
    fn start_stops_at_first_failure() {
        let queue = EventQueue::new();
        let log = InitLog::default();
        let mut parts = subsystems(&log);
        parts.audio.fail = Some(0x1B);
        let mut app = Application::new(&queue, parts, FakeLeds::default(), PairingConfig::default());

        assert_eq!(
            app.start(),
            Err(StartupError {
                subsystem: SubsystemId::Audio,
                code: 0x1B
            })
        );
        assert!(!app.is_started());
        assert!(!log.borrow().contains(&SubsystemId::Transport));
    }

    #[test]
    fn poll_is_inert_before_start() {
        let queue = EventQueue::new();
        let log = InitLog::default();
        let mut app = Application::new(
            &queue,
            subsystems(&log),
            FakeLeds::default(),
            PairingConfig::default(),
        );
        app.queue_event(Event::key(5, true, 0)).unwrap();
        assert_eq!(app.poll(0), 0);
        assert_eq!(queue.len(), 1);

        app.start().unwrap();
        assert_eq!(app.poll(1), 1);
        assert_eq!(app.keys().events, [Event::key(5, true, 0)]);
    }

    #[test]
    fn key_events_reach_key_subsystem_in_order() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        let key = Event::Key {
            index: 5,
            down: true,
            modifiers: 0x02,
            stamp: 10,
        };
        let button = Event::button(2, true, 11);
        app.queue_event(key).unwrap();
        app.queue_event(button).unwrap();

        assert_eq!(app.poll(12), 2);
        assert_eq!(app.keys().events, [key, button]);
        assert!(queue.is_empty());
    }

    #[test]
    fn audio_tokens_drive_audio_led() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.queue_event(Event::info(AUDIO_START, 1)).unwrap();
        app.queue_event(Event::Any {
            code: 0x30,
            data: [7; ANY_PAYLOAD_LEN],
            stamp: 2,
        })
        .unwrap();
        app.queue_event(Event::info(AUDIO_STOP, 3)).unwrap();
        app.queue_event(Event::info(0x77, 4)).unwrap();
        app.poll(5);

        assert_eq!(app.audio().events.len(), 3);
        assert_eq!(
            app.indicator().0,
            [(Led::Error, LedMode::On), (Led::Error, LedMode::Off)]
        );
        assert!(app.keys().events.is_empty());
    }

    static USER_CALLS: AtomicU32 = AtomicU32::new(0);
    static USER_LAST: AtomicU32 = AtomicU32::new(0);

    fn record_user(stamp: u32, data: &[u8; USER_PAYLOAD_LEN]) {
        USER_CALLS.fetch_add(1, Ordering::SeqCst);
        USER_LAST.store(stamp ^ u32::from_le_bytes(*data), Ordering::SeqCst);
    }

    #[test]
    fn user_events_reach_registered_handler() {
        let queue = EventQueue::new();
        let mut app = started(&queue);

        // Without a handler the event is consumed quietly.
        app.queue_event(Event::UserDefine {
            data: [0; USER_PAYLOAD_LEN],
            stamp: 1,
        })
        .unwrap();
        app.poll(1);
        assert_eq!(USER_CALLS.load(Ordering::SeqCst), 0);

        app.on_user_event(record_user);
        app.queue_event(Event::UserDefine {
            data: [1, 0, 0, 0],
            stamp: 0x100,
        })
        .unwrap();
        app.poll(2);
        assert_eq!(USER_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(USER_LAST.load(Ordering::SeqCst), 0x101);
    }

    #[test]
    fn overflow_releases_all_keys_once() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        for i in 0..44u8 {
            app.queue_event(Event::key(i % 8, true, 0)).unwrap();
        }
        assert_eq!(app.queue_event(Event::key(9, true, 0)), Err(QueueFull));
        assert_eq!(app.queue_event(Event::key(9, true, 0)), Err(QueueFull));

        assert_eq!(app.poll(1), 44);
        assert_eq!(app.keys().releases, 1);

        app.poll(2);
        assert_eq!(app.keys().releases, 1);
    }

    #[test]
    fn lost_connect_release_does_not_start_pairing() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.queue_event(Event::key(CONNECT_INDEX, true, 0)).unwrap();
        app.poll(0);

        for _ in 0..44 {
            app.queue_event(Event::info(0x01, 100)).unwrap();
        }
        assert_eq!(
            app.queue_event(Event::key(CONNECT_INDEX, false, 500)),
            Err(QueueFull)
        );

        app.poll(600);
        assert_eq!(app.keys().releases, 1);
        assert_eq!(app.link().combo_held_ms(), 0);

        app.poll(12_000);
        app.poll(30_000);
        assert_eq!(app.transport().pairing_requests, 0);
        assert_eq!(app.link().pairing_requests(), 0);
    }

    #[test]
    fn poll_handles_at_most_one_queue_per_call() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        for _ in 0..44 {
            queue.enqueue(Event::info(0x01, 0)).unwrap();
        }
        assert_eq!(app.poll(0), 44);
        assert_eq!(app.poll(0), 0);
    }

    #[test]
    fn keyboard_led_set_report_reaches_key_subsystem() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.set_report(ReportType::Output, output::KB_LED, &[0x01], 1);
        assert_eq!(app.keys().leds, [vec![0x01u8]]);
        assert!(app.audio().reports.is_empty());
        assert!(app.battery().count_control.is_empty());
    }

    #[test]
    fn audio_and_count_control_routes() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.set_report(ReportType::Output, output::AUDIO_DATA, &[1, 2, 3], 3);
        app.set_report(ReportType::Feature, feature::AUDIO_CTL, &[9], 1);
        app.set_report(ReportType::Feature, feature::CNT_CTL, &[4, 5], 2);

        assert_eq!(
            app.audio().reports,
            [
                (ReportType::Output, output::AUDIO_DATA, vec![1u8, 2, 3]),
                (ReportType::Feature, feature::AUDIO_CTL, vec![9u8]),
            ]
        );
        assert_eq!(app.battery().count_control, [vec![4u8, 5]]);
    }

    #[test]
    fn unroutable_and_malformed_reports_have_no_side_effects() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.set_report(ReportType::Input, 0x01, &[0x01], 1);
        app.set_report(ReportType::Feature, 0xFF, &[0x01], 1);
        app.set_report(ReportType::Output, output::KB_LED, &[0x01], 4);

        assert!(app.keys().leds.is_empty());
        assert!(app.audio().reports.is_empty());
        assert!(app.battery().count_control.is_empty());
        assert_eq!(app.reports().unroutable(), 2);
        assert_eq!(app.reports().malformed(), 1);
    }

    #[test]
    fn transport_notifications_drive_link_led() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.transport_state_changed(raw::CONNECTED);
        app.transport_state_changed(raw::CONNECTED);
        assert_eq!(app.link().state(), LinkState::Connected);
        assert_eq!(app.indicator().0, [(Led::Link, LedMode::On)]);
    }

    #[test]
    fn held_connect_key_requests_pairing_from_transport() {
        let queue = EventQueue::new();
        let mut app = started(&queue);
        app.transport_state_changed(raw::CONNECTED);

        app.queue_event(Event::key(CONNECT_INDEX, true, 100)).unwrap();
        app.poll(100);
        app.poll(5_000);
        app.transport_state_changed(raw::RECONNECTING);
        app.poll(10_099);
        assert_eq!(app.transport().pairing_requests, 0);

        app.poll(10_100);
        assert_eq!(app.transport().pairing_requests, 1);
        assert_eq!(
            app.indicator().0.last(),
            Some(&(
                Led::Link,
                LedMode::Blink {
                    count: 0,
                    period_ms: LINK_PAIRING_BLINK_PERIOD_MS
                }
            ))
        );

        app.poll(40_000);
        assert_eq!(app.transport().pairing_requests, 1);
    }
}
