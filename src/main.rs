use std::sync::Arc;
use std::thread;
use std::time::Duration;

use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{esp, gpio_install_isr_service, ESP_INTR_FLAG_IRAM};

use harmonie::app::Harmonie;
use harmonie::config;
use harmonie::display::FrameBuffer;
use harmonie::hal::{EspAdc, EspDelay, EspIo, NvsConfigStore, PinMap, StopInterrupt};
use harmonie::io::Board;

fn main() {
    // Must run once or the esp-idf-sys runtime patches may not link
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    EspLogger::initialize_default();
    log::info!("Harmonie {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        log::error!("Halted: {:#}", e);
    }
    // outputs were left low, wait for a power cycle
    loop {
        thread::sleep(Duration::from_secs(1));
    }
}

fn run() -> anyhow::Result<()> {
    let nvs = EspDefaultNvsPartition::take()?;
    let pins = PinMap::default();

    // Installs the generic GPIO interrupt handler
    esp!(unsafe { gpio_install_isr_service(ESP_INTR_FLAG_IRAM as i32) })?;

    // the panel geometry comes from the stored configuration
    let mut store = NvsConfigStore::new(nvs)?;
    let config = config::load_or_default(&mut store)?;
    let params = config.params;

    let board = Board {
        io: Arc::new(EspIo::new(pins)?),
        display: Arc::new(FrameBuffer::new(params.lcd_rows, params.lcd_cols)),
        analog: Arc::new(EspAdc::new()?),
        delay: Arc::new(EspDelay),
    };

    let mut app = Harmonie::new(board, config, Box::new(store));
    let _stop = StopInterrupt::install(pins.stop, app.stop_latch())?;
    app.start_tasks()?;
    app.run()
}
