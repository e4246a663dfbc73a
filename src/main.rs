//! BLE remote control firmware for the nRF52840-DK.
//!
//! Tasks:
//!   - `softdevice_task` - SoftDevice event pump
//!   - `transport_task`  - advertising, GATT server, link notifications
//!   - `home_button_task` - HOME key producer (P0.11)
//!   - `app_task`        - the single event consumer; owns the application
//!
//! Producers only touch the static event queue; link notifications and
//! Set-Reports reach the consumer through channels.

#![no_std]
#![no_main]

mod board;

use ble_remote::config::{
    PairingConfig, APP_TICK_MS, BT_LOCAL_NAME, BUTTON_DEBOUNCE_MS, CONNECT_INDEX,
    ERROR_BLINK_PERIOD_MS,
};
use ble_remote::event::{Event, USER_PAYLOAD_LEN};
use ble_remote::indicator::{Indicator, Led, LedBank, LedMode};
use ble_remote::{Application, EventQueue, Subsystems};
use board::{
    BoardAudio, BoardBattery, BoardKeys, BoardOta, Server, SoftDeviceTransport, HOST_REPORTS,
    LINK_STATES,
};
use defmt::{error, info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select4, Either4};
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::Priority;
use embassy_time::{Duration, Instant, Ticker, Timer};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

type Leds = LedBank<Output<'static>, Output<'static>>;

type RemoteApp = Application<
    'static,
    BoardBattery,
    BoardOta,
    BoardKeys,
    BoardAudio,
    SoftDeviceTransport,
    Leds,
>;

static EVENTS: EventQueue = EventQueue::new();

/// Millisecond timestamp for events and the combo timer (wraps).
fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn transport_task(sd: &'static Softdevice, server: &'static Server) -> ! {
    board::run_transport(sd, server).await
}

/// Debounced HOME key: one key-down and one key-up event per press.
#[embassy_executor::task]
async fn home_button_task(mut btn: Input<'static>) -> ! {
    loop {
        btn.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if btn.is_high() {
            continue;
        }

        if EVENTS.enqueue(Event::key(CONNECT_INDEX, true, now_ms())).is_err() {
            warn!("HOME press dropped, queue full");
        }

        btn.wait_for_rising_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if EVENTS.enqueue(Event::key(CONNECT_INDEX, false, now_ms())).is_err() {
            warn!("HOME release dropped, queue full");
        }
    }
}

fn on_user_event(stamp: u32, data: &[u8; USER_PAYLOAD_LEN]) {
    info!("User event @{}: {=[u8]:#x}", stamp, &data[..]);
}

#[embassy_executor::task]
async fn app_task(mut app: RemoteApp) -> ! {
    if let Err(e) = app.start() {
        error!("Startup failed: {}", e);
        app.indicator_mut().set(
            Led::Error,
            LedMode::Blink {
                count: 0,
                period_ms: ERROR_BLINK_PERIOD_MS,
            },
        );
        loop {
            Timer::after(Duration::from_millis(APP_TICK_MS)).await;
            app.indicator_mut().tick(now_ms());
        }
    }
    app.on_user_event(on_user_event);

    let mut ticker = Ticker::every(Duration::from_millis(APP_TICK_MS));
    loop {
        match select4(
            EVENTS.wait(),
            LINK_STATES.receive(),
            HOST_REPORTS.receive(),
            ticker.next(),
        )
        .await
        {
            Either4::First(()) | Either4::Fourth(()) => {}
            Either4::Second(state) => app.transport_state_changed(state),
            Either4::Third(report) => app.set_report(
                report.report_type,
                report.report_id,
                &report.data,
                report.data.len() as u16,
            ),
        }

        let now = now_ms();
        app.poll(now);
        app.indicator_mut().tick(now);
    }
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: BT_LOCAL_NAME.as_ptr() as _,
            current_len: BT_LOCAL_NAME.len() as u16,
            max_len: BT_LOCAL_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("{} starting", BT_LOCAL_NAME);

    // The SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let sd = Softdevice::enable(&softdevice_config());

    static SERVER: StaticCell<Server> = StaticCell::new();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    let sd: &'static Softdevice = sd;

    unwrap!(spawner.spawn(softdevice_task(sd)));

    let leds = LedBank::new(
        Output::new(p.P0_13, Level::High, OutputDrive::Standard),
        Output::new(p.P0_14, Level::High, OutputDrive::Standard),
        true,
    );

    let app = Application::new(
        &EVENTS,
        Subsystems {
            battery: BoardBattery::new(server),
            ota: BoardOta,
            keys: BoardKeys::default(),
            audio: BoardAudio::default(),
            transport: SoftDeviceTransport,
        },
        leds,
        PairingConfig::default(),
    );

    unwrap!(spawner.spawn(transport_task(sd, server)));
    unwrap!(spawner.spawn(home_button_task(Input::new(p.P0_11, Pull::Up))));
    unwrap!(spawner.spawn(app_task(app)));
}
