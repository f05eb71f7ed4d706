#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use babypod_core::sync::{
    BootReport, HardwareInitError, OfflineHardware, SyncConfig, SyncCoordinator,
};
use babypod_hal_esp32s3::{
    network::{BabyBuddyClient, ConnectivityHandle, HttpState},
    rtc::BoardRtc,
    storage::sd_records::{SdCardBus, SdRecordStore},
};
use embassy_executor::Spawner;
use embassy_net::Stack;
use embassy_time::{Duration as EmbassyDuration, Instant, Timer, WithTimeout};
use esp_hal::{
    Blocking,
    clock::CpuClock,
    delay::Delay,
    gpio::{Level, Output, OutputConfig},
    i2c::master::{Config as I2cConfig, I2c},
    rng::Rng,
    rtc_cntl::reset_reason,
    spi::master::Spi,
    system::{Cpu, software_reset},
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::{LevelFilter, error, info, warn};
use static_cell::StaticCell;

use prefs::BoardPrefs;

#[path = "main/config.rs"]
mod config;
#[path = "main/prefs.rs"]
mod prefs;

const SD_SPI_HZ: u32 = 400_000;
const I2C_HZ: u32 = 100_000;
const WIFI_RETRY_BACKOFF_MIN_SECS: u64 = 2;
const WIFI_RETRY_BACKOFF_MAX_SECS: u64 = 120;
const NETWORK_POLL_INTERVAL_MS: u64 = 500;
const DHCP_TIMEOUT_SECS: u64 = 15;
const ENGINE_POLL_SECS: u64 = 5;
const FATAL_PAUSE_SECS: u64 = 10;

type SdBus = SdCardBus<Spi<'static, Blocking>, Output<'static>, Delay>;
type SdStore = SdRecordStore<'static, Spi<'static, Blocking>, Output<'static>, Delay>;
type Rtc = BoardRtc<I2c<'static, Blocking>>;

static CONNECTIVITY: ConnectivityHandle = ConnectivityHandle::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static SD_CARD: StaticCell<RefCell<SdBus>> = StaticCell::new();
static HTTP_STATE: StaticCell<HttpState> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("fatal: panic {}", info);
    Delay::new().delay_millis((FATAL_PAUSE_SECS * 1_000) as u32);
    software_reset()
}

/// Last-resort handler: log, leave time to read the console, restart.
async fn fatal(context: &str, err: impl core::fmt::Debug) -> ! {
    error!(
        "fatal: {} err={:?} restarting_in_s={}",
        context, err, FATAL_PAUSE_SECS
    );
    Timer::after_secs(FATAL_PAUSE_SECS).await;
    software_reset()
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// RTC and SD card; either missing leaves the device online-only.
fn offline_hardware(
    sd: Option<SdBus>,
    i2c: Option<I2c<'static, Blocking>>,
) -> Result<OfflineHardware<SdStore, SdStore, Rtc>, HardwareInitError> {
    let i2c = i2c.ok_or(HardwareInitError::RtcMissing)?;
    let rtc = BoardRtc::probe(i2c).map_err(|_| HardwareInitError::RtcMissing)?;

    let mut sd = sd.ok_or(HardwareInitError::StorageMissing)?;
    if let Err(err) = sd.probe() {
        warn!("sd: probe failed err={:?}", err);
        return Err(HardwareInitError::StorageMissing);
    }
    let card: &'static RefCell<SdBus> = SD_CARD.init(RefCell::new(sd));

    Ok(OfflineHardware {
        log_store: SdRecordStore::new(card),
        cache_store: SdRecordStore::new(card),
        rtc,
    })
}

fn log_boot_report(report: &BootReport) {
    info!(
        "engine: boot mode={:?} pending={} hardware_error={:?} connect_error={:?}",
        report.mode, report.pending, report.hardware_error, report.connect_error
    );
    match report.replay {
        Some(Ok(done)) => info!("engine: boot replay drained replayed={}", done.replayed),
        Some(Err(failed)) => warn!(
            "engine: boot replay stopped err={:?} replayed={} remaining={}",
            failed.error, failed.replayed, failed.remaining
        ),
        None => {}
    }
    if let Err(err) = report.clock {
        // Shown to the user by the flow layer.
        warn!("engine: clock err={:?}", err);
    }
}

fn wifi_retry_backoff_secs(consecutive_failures: u32) -> u64 {
    // 2, 4, 8, 16, 32, 64, 120, 120, ...
    let shift = consecutive_failures.min(6);
    WIFI_RETRY_BACKOFF_MIN_SECS
        .saturating_mul(1u64 << shift)
        .min(WIFI_RETRY_BACKOFF_MAX_SECS)
}

async fn wait_before_wifi_retry(consecutive_failures: &mut u32) {
    let delay_secs = wifi_retry_backoff_secs(*consecutive_failures);
    *consecutive_failures = consecutive_failures.saturating_add(1);
    info!(
        "wifi: retrying in_s={} consecutive_failures={}",
        delay_secs, *consecutive_failures
    );
    Timer::after_secs(delay_secs).await;
}

/// Keeps the station associated while the engine wants a link, and idle
/// otherwise.
async fn wifi_connection_loop(
    wifi_controller: &mut WifiController<'_>,
    stack: Stack<'_>,
    connectivity: &'static ConnectivityHandle,
) -> ! {
    let mut consecutive_failures = 0u32;

    loop {
        if !connectivity.link_requested() {
            if matches!(wifi_controller.is_connected(), Ok(true)) {
                let _ = wifi_controller.disconnect_async().await;
                info!("wifi: released");
            }
            connectivity.mark_disconnected();
            consecutive_failures = 0;
            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
            continue;
        }

        connectivity.mark_connecting();

        if !wifi_controller.is_started().unwrap_or(false)
            && let Err(err) = wifi_controller.start_async().await
        {
            info!("wifi: start failed err={:?}", err);
            connectivity.mark_disconnected();
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        if let Err(err) = wifi_controller.connect_async().await {
            info!("wifi: connect failed err={:?}", err);
            connectivity.mark_disconnected();
            let _ = wifi_controller.disconnect_async().await;
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        match stack
            .wait_config_up()
            .with_timeout(EmbassyDuration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                connectivity.update_link_ip(stack.is_link_up(), stack.config_v4().is_some());
                info!("wifi: connected and dhcp ready");
            }
            Err(_) => {
                info!("wifi: dhcp timeout, forcing reconnect");
                connectivity.update_link_ip(stack.is_link_up(), false);
                let _ = wifi_controller.disconnect_async().await;
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        consecutive_failures = 0;

        while connectivity.link_requested() {
            let link_up = stack.is_link_up();
            let has_ipv4 = stack.config_v4().is_some();
            let is_connected = matches!(wifi_controller.is_connected(), Ok(true));

            connectivity.update_link_ip(link_up, has_ipv4);

            if !(link_up && has_ipv4 && is_connected) {
                info!(
                    "wifi: state lost link_up={} has_ipv4={} connected={}",
                    link_up, has_ipv4, is_connected
                );
                connectivity.mark_disconnected();
                let _ = wifi_controller.disconnect_async().await;
                wait_before_wifi_retry(&mut consecutive_failures).await;
                break;
            }

            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
        }
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: babypod starting device={}", config::DEVICE_NAME);

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);
    info!("boot: reset_reason={:?}", reset_reason(Cpu::ProCpu));

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // SD wiring: CS=GPIO8 SCK=GPIO4 MOSI=GPIO40 MISO=GPIO41
    let sd_cs = Output::new(peripherals.GPIO8, Level::High, OutputConfig::default());
    let sd_spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(SD_SPI_HZ))
        // SD cards in SPI mode use CPOL=0, CPHA=0.
        .with_mode(esp_hal::spi::Mode::_0);
    let sd_bus = match Spi::new(peripherals.SPI3, sd_spi_config) {
        Ok(spi) => Some(SdCardBus::new(
            spi.with_sck(peripherals.GPIO4)
                .with_mosi(peripherals.GPIO40)
                .with_miso(peripherals.GPIO41),
            sd_cs,
            Delay::new(),
        )),
        Err(err) => {
            warn!("sd: spi config rejected err={:?}", err);
            None
        }
    };

    // RTC wiring: SDA=GPIO6 SCL=GPIO7
    let i2c_config = I2cConfig::default().with_frequency(Rate::from_hz(I2C_HZ));
    let i2c = match I2c::new(peripherals.I2C0, i2c_config) {
        Ok(i2c) => Some(i2c.with_sda(peripherals.GPIO6).with_scl(peripherals.GPIO7)),
        Err(err) => {
            warn!("rtc: i2c config rejected err={:?}", err);
            None
        }
    };

    let hardware = offline_hardware(sd_bus, i2c);

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => fatal("esp-radio init", err).await,
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => fatal("wifi peripheral init", err).await,
        };

    let client_config = ClientConfig::default()
        .with_ssid(config::WIFI_CONFIG.ssid.into())
        .with_password(config::WIFI_CONFIG.password.into());
    if let Err(err) = wifi_controller.set_config(&ModeConfig::Client(client_config)) {
        fatal("wifi mode config", err).await;
    }

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x5A17_2B34_D099_EE11,
    );

    info!(
        "boot: api_host={} api_port={} time_host={}",
        config::API_CONFIG.host,
        config::API_CONFIG.port,
        config::TIME_CONFIG.host
    );

    let net_future = net_runner.run();
    let wifi_future = wifi_connection_loop(&mut wifi_controller, stack, &CONNECTIVITY);
    let engine_future = async {
        let client = BabyBuddyClient::new(
            stack,
            HTTP_STATE.init(HttpState::new()),
            &CONNECTIVITY,
            config::API_CONFIG,
            config::TIME_CONFIG,
        );
        let sync_config = SyncConfig {
            boot_nonce: Rng::new().random(),
            ..SyncConfig::default()
        };
        let (mut engine, report) =
            SyncCoordinator::boot(client, hardware, BoardPrefs::open(), sync_config).await;
        log_boot_report(&report);

        // The flow layer drives `engine` from here; this loop only keeps the
        // clock fresh and reports mode changes.
        let resync_every = EmbassyDuration::from_secs(u64::from(sync_config.resync_interval_secs));
        let mut last_clock_check = Instant::now();
        let mut last_mode = engine.current_mode();
        let mut last_connectivity_revision = u32::MAX;
        loop {
            Timer::after_secs(ENGINE_POLL_SECS).await;

            let mode = engine.current_mode();
            if mode != last_mode {
                info!(
                    "engine: mode changed from={:?} to={:?} pending={}",
                    last_mode,
                    mode,
                    engine.pending_count()
                );
                last_mode = mode;
            }

            let connectivity = CONNECTIVITY.snapshot();
            if connectivity.revision != last_connectivity_revision {
                info!(
                    "net: state={:?} usable={}",
                    connectivity.state,
                    connectivity.usable()
                );
                last_connectivity_revision = connectivity.revision;
            }

            if last_clock_check.elapsed() >= resync_every {
                last_clock_check = Instant::now();
                match engine.maybe_sync_clock(false).await {
                    Ok(outcome) => info!("engine: periodic clock check outcome={:?}", outcome),
                    Err(err) => warn!("engine: periodic clock check err={:?}", err),
                }
            }
        }
    };

    let _ = embassy_futures::join::join3(net_future, wifi_future, engine_future).await;
    unreachable!()
}
