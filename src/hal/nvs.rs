use anyhow::Context;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

use crate::config::{Config, ConfigStore};

const NVS_NAMESPACE: &str = "harmonie";
const CONFIG_KEY: &str = "config";

/// The whole configuration as one postcard blob in flash
pub struct NvsConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsConfigStore {
    pub fn new(nvs_part: EspNvsPartition<NvsDefault>) -> anyhow::Result<Self> {
        Ok(NvsConfigStore {
            nvs: EspNvs::new(nvs_part, NVS_NAMESPACE, true)?,
        })
    }
}

impl ConfigStore for NvsConfigStore {
    fn load(&self) -> anyhow::Result<Config> {
        let blob_size = self
            .nvs
            .blob_len(CONFIG_KEY)?
            .context("no configuration in flash")?;
        let mut buf = vec![0; blob_size];
        let blob = self
            .nvs
            .get_raw(CONFIG_KEY, &mut buf)
            .context("error loading nvs")?
            .context("configuration blob vanished")?;
        let config = Config::from_blob(blob)?;
        log::info!("Loaded configuration from flash ({} bytes)", blob.len());
        Ok(config)
    }

    fn save(&mut self, config: &Config) -> anyhow::Result<()> {
        let buf = config.to_blob()?;
        self.nvs.set_raw(CONFIG_KEY, &buf).context("nvs failure")?;
        log::info!("Configuration written to flash ({} bytes)", buf.len());
        Ok(())
    }
}
