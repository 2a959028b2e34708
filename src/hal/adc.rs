use esp_idf_svc::sys::{
    adc1_channel_t, adc1_channel_t_ADC1_CHANNEL_0, adc1_channel_t_ADC1_CHANNEL_3,
    adc1_config_channel_atten, adc1_config_width, adc1_get_raw, adc_atten_t_ADC_ATTEN_DB_12,
    adc_bits_width_t_ADC_WIDTH_BIT_12, esp,
};

use crate::io::{AnalogInput, Channel};

/// Left shift bringing a 12 bit conversion to the `u16` range
const SCALE_SHIFT: u32 = 4;

/// One-shot conversions on ADC1. Current on GPIO36, temperature on GPIO39.
pub struct EspAdc;

impl EspAdc {
    pub fn new() -> anyhow::Result<Self> {
        unsafe {
            esp!(adc1_config_width(adc_bits_width_t_ADC_WIDTH_BIT_12))?;
            for channel in [Channel::Current, Channel::Temperature] {
                esp!(adc1_config_channel_atten(
                    Self::channel(channel),
                    adc_atten_t_ADC_ATTEN_DB_12
                ))?;
            }
        }
        Ok(EspAdc)
    }

    fn channel(channel: Channel) -> adc1_channel_t {
        match channel {
            Channel::Current => adc1_channel_t_ADC1_CHANNEL_0,
            Channel::Temperature => adc1_channel_t_ADC1_CHANNEL_3,
        }
    }
}

impl AnalogInput for EspAdc {
    fn read_raw(&self, channel: Channel) -> u16 {
        let raw = unsafe { adc1_get_raw(Self::channel(channel)) };
        if raw < 0 {
            log::warn!("{:?} conversion failed", channel);
            return 0;
        }
        // 12 bit reading, fits once shifted
        (raw as u16) << SCALE_SHIFT
    }
}
