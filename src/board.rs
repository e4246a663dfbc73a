//! nRF52840 board collaborators for the firmware binary.
//!
//! The BLE transport runs on the Nordic SoftDevice S140 in peripheral
//! role. The remaining subsystems (battery, OTA, key scan, audio) are
//! minimal board drivers that log what the application hands them.
//!
//! Tasks talk to the application only through the statics below; the
//! application itself is owned by the consumer task in `main.rs`.

use core::cell::RefCell;

use ble_remote::config::{BT_LOCAL_NAME, MAX_AUDIO_REPORT_LEN};
use ble_remote::event::{Event, AUDIO_START, AUDIO_STOP};
use ble_remote::link::raw as link_raw;
use ble_remote::report::ReportType;
use ble_remote::subsystem::{Audio, Battery, KeyScan, Ota, Subsystem, SubsystemId, Transport};
use defmt::{debug, info, warn, Format};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;
use nrf_softdevice::ble::advertisement_builder::{
    Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload, ServiceList, ServiceUuid16,
};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    gatt_server, peripheral, Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode,
};
use nrf_softdevice::Softdevice;
use static_cell::StaticCell;

/// Bonds kept in RAM.
const MAX_BONDS: usize = 4;

/// Raw type byte, report ID byte, then the payload.
const SET_REPORT_FRAME_LEN: usize = MAX_AUDIO_REPORT_LEN + 2;

/// A Set-Report frame received from the host.
#[derive(Format)]
pub struct HostReport {
    pub report_type: ReportType,
    pub report_id: u8,
    pub data: Vec<u8, MAX_AUDIO_REPORT_LEN>,
}

/// Raw link state codes, transport task → application.
pub static LINK_STATES: Channel<CriticalSectionRawMutex, u32, 4> = Channel::new();

/// Set-Report frames, transport task → application.
pub static HOST_REPORTS: Channel<CriticalSectionRawMutex, HostReport, 4> = Channel::new();

/// Transport brought up by the application.
static BLE_START: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Pairing requested by the application.
static PAIRING: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// GATT

#[nrf_softdevice::gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", read, notify)]
    battery_level: u8,
}

#[nrf_softdevice::gatt_service(uuid = "5c3a0001-6f2e-4c1b-9f4d-8d2b52a1e0b1")]
pub struct RemoteService {
    // [report type, report id, payload..]
    #[characteristic(uuid = "5c3a0002-6f2e-4c1b-9f4d-8d2b52a1e0b1", write, write_without_response)]
    set_report: Vec<u8, SET_REPORT_FRAME_LEN>,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub battery: BatteryService,
    pub remote: RemoteService,
}

/// Split a Set-Report frame into a [`HostReport`].
fn parse_frame(frame: &[u8]) -> Option<HostReport> {
    let (&raw_type, rest) = frame.split_first()?;
    let (&report_id, payload) = rest.split_first()?;
    let report_type = ReportType::from_raw(raw_type)?;
    let data = Vec::from_slice(payload).ok()?;
    Some(HostReport {
        report_type,
        report_id,
        data,
    })
}

// Advertising

static ADV_PAIRING: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .services_16(ServiceList::Incomplete, &[ServiceUuid16::BATTERY])
    .full_name(BT_LOCAL_NAME)
    .build();

static ADV_RECONNECT: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::LE_Only])
    .full_name(BT_LOCAL_NAME)
    .build();

static SCAN_DATA: [u8; 0] = [];

// Bonding

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

struct Bonder {
    peers: RefCell<Vec<PeerBond, MAX_BONDS>>,
}

impl Bonder {
    fn new() -> Self {
        Self {
            peers: RefCell::new(Vec::new()),
        }
    }

    fn has_bonds(&self) -> bool {
        !self.peers.borrow().is_empty()
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let mut peers = self.peers.borrow_mut();
        if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
            existing.key = key;
            existing.peer_id = peer_id;
            return;
        }

        if peers.is_full() {
            peers.remove(0);
        }

        let _ = peers.push(PeerBond {
            master_id,
            key,
            peer_id,
        });
        info!("Bonded ({} peers)", peers.len());
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.peers.borrow().iter().find_map(|p| {
            p.peer_id
                .is_match(conn.peer_address())
                .then_some((p.master_id, p.key))
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE security mode updated: {}", mode);
    }
}

fn bonder() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}

/// Advertise, serve one connection at a time and report every link
/// transition to the application.
pub async fn run_transport(sd: &'static Softdevice, server: &'static Server) -> ! {
    BLE_START.wait().await;
    info!("BLE transport running");

    let bonder = bonder();
    let config = peripheral::Config::default();
    let mut pairing = !bonder.has_bonds();

    loop {
        let (adv_data, state) = if pairing {
            (&ADV_PAIRING, link_raw::DISCOVERABLE)
        } else {
            (&ADV_RECONNECT, link_raw::RECONNECTING)
        };
        LINK_STATES.send(state).await;

        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data,
            scan_data: &SCAN_DATA,
        };

        let advertising = peripheral::advertise_pairable(sd, adv, &config, bonder);
        let conn = match select(advertising, PAIRING.wait()).await {
            Either::First(Ok(conn)) => conn,
            Either::First(Err(e)) => {
                warn!("Advertising failed: {}", e);
                LINK_STATES.send(link_raw::DISCONNECTED).await;
                continue;
            }
            Either::Second(()) => {
                pairing = true;
                continue;
            }
        };

        pairing = false;
        LINK_STATES.send(link_raw::CONNECTED).await;

        let serving = gatt_server::run(&conn, server, |e| match e {
            ServerEvent::Battery(BatteryServiceEvent::BatteryLevelCccdWrite { notifications }) => {
                debug!("Battery notifications: {}", notifications);
            }
            ServerEvent::Remote(RemoteServiceEvent::SetReportWrite(frame)) => {
                match parse_frame(&frame) {
                    Some(report) => {
                        if HOST_REPORTS.try_send(report).is_err() {
                            warn!("Set-Report backlog full, frame dropped");
                        }
                    }
                    None => warn!("Bad Set-Report frame ({} bytes)", frame.len()),
                }
            }
        });

        match select(serving, PAIRING.wait()).await {
            Either::First(_) => info!("Host disconnected"),
            Either::Second(()) => {
                info!("Pairing requested, dropping current link");
                let _ = conn.disconnect();
                pairing = true;
            }
        }
        LINK_STATES.send(link_raw::DISCONNECTED).await;
    }
}

// Subsystems

pub struct SoftDeviceTransport;

impl Subsystem for SoftDeviceTransport {
    const ID: SubsystemId = SubsystemId::Transport;

    fn init(&mut self) -> Result<(), u32> {
        BLE_START.signal(());
        Ok(())
    }
}

impl Transport for SoftDeviceTransport {
    fn enter_pairing(&mut self) {
        PAIRING.signal(());
    }
}

pub struct BoardBattery {
    server: &'static Server,
    count_control: u8,
}

impl BoardBattery {
    pub fn new(server: &'static Server) -> Self {
        Self {
            server,
            count_control: 0,
        }
    }
}

impl Subsystem for BoardBattery {
    const ID: SubsystemId = SubsystemId::Battery;

    fn init(&mut self) -> Result<(), u32> {
        // No gauge on the DK; report a full battery.
        self.server.battery.battery_level_set(&100).map_err(|_| 1)
    }
}

impl Battery for BoardBattery {
    fn count_control(&mut self, payload: &[u8]) {
        if let Some(&value) = payload.first() {
            self.count_control = value;
            info!("Count control: {=u8:#x}", value);
        }
    }
}

pub struct BoardOta;

impl Subsystem for BoardOta {
    const ID: SubsystemId = SubsystemId::Ota;

    fn init(&mut self) -> Result<(), u32> {
        Ok(())
    }
}

impl Ota for BoardOta {}

#[derive(Default)]
pub struct BoardKeys {
    held: u32,
}

impl Subsystem for BoardKeys {
    const ID: SubsystemId = SubsystemId::KeyScan;

    fn init(&mut self) -> Result<(), u32> {
        self.held = 0;
        Ok(())
    }
}

impl KeyScan for BoardKeys {
    fn handle_event(&mut self, event: &Event) {
        if let Some((index, down)) = event.key_transition() {
            let bit = 1u32 << index.min(31);
            if down {
                self.held |= bit;
            } else {
                self.held &= !bit;
            }
            debug!("Key {} {}", index, if down { "down" } else { "up" });
        }
    }

    fn set_keyboard_led(&mut self, payload: &[u8]) {
        info!("Keyboard LEDs: {=[u8]:#x}", payload);
    }

    fn release_all(&mut self) {
        warn!("Releasing all keys");
        self.held = 0;
    }
}

#[derive(Default)]
pub struct BoardAudio {
    streaming: bool,
}

impl Subsystem for BoardAudio {
    const ID: SubsystemId = SubsystemId::Audio;

    fn init(&mut self) -> Result<(), u32> {
        self.streaming = false;
        Ok(())
    }
}

impl Audio for BoardAudio {
    fn handle_event(&mut self, event: &Event) {
        match *event {
            Event::Info {
                code: AUDIO_START, ..
            } => self.streaming = true,
            Event::Info {
                code: AUDIO_STOP, ..
            } => self.streaming = false,
            _ => {}
        }
        debug!("Audio event {} (streaming: {})", event, self.streaming);
    }

    fn set_report(&mut self, report_type: ReportType, report_id: u8, payload: &[u8]) {
        debug!(
            "Audio report {} {=u8:#x}, {} bytes",
            report_type,
            report_id,
            payload.len()
        );
    }
}
