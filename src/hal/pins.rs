use esp_idf_svc::sys::{
    esp, gpio_config, gpio_config_t, gpio_get_level, gpio_int_type_t_GPIO_INTR_DISABLE,
    gpio_mode_t_GPIO_MODE_INPUT, gpio_mode_t_GPIO_MODE_OUTPUT, gpio_num_t, gpio_set_level,
};

use crate::io::{DigitalIo, Input, Output};

/// GPIO numbers of the operator board. Inputs are wired active high with
/// the internal pull-down enabled.
#[derive(Debug, Clone, Copy)]
pub struct PinMap {
    pub open: gpio_num_t,
    pub close: gpio_num_t,
    pub stop: gpio_num_t,
    pub open_limit: gpio_num_t,
    pub close_limit: gpio_num_t,
    pub up: gpio_num_t,
    pub down: gpio_num_t,
    pub select: gpio_num_t,
    pub open_out: gpio_num_t,
    pub close_out: gpio_num_t,
    pub stop_out: gpio_num_t,
    pub counter_out: gpio_num_t,
}

impl Default for PinMap {
    fn default() -> Self {
        PinMap {
            open: 4,
            close: 5,
            stop: 13,
            open_limit: 14,
            close_limit: 15,
            up: 25,
            down: 26,
            select: 27,
            open_out: 16,
            close_out: 17,
            stop_out: 18,
            counter_out: 19,
        }
    }
}

impl PinMap {
    fn input(&self, input: Input) -> gpio_num_t {
        match input {
            Input::Open => self.open,
            Input::Close => self.close,
            Input::Stop => self.stop,
            Input::OpenLimit => self.open_limit,
            Input::CloseLimit => self.close_limit,
            Input::Up => self.up,
            Input::Down => self.down,
            Input::Select => self.select,
        }
    }

    fn output(&self, output: Output) -> gpio_num_t {
        match output {
            Output::Open => self.open_out,
            Output::Close => self.close_out,
            Output::Stop => self.stop_out,
            Output::Counter => self.counter_out,
        }
    }

    fn mask<I: IntoIterator<Item = gpio_num_t>>(pins: I) -> u64 {
        pins.into_iter().fold(0, |mask, pin| mask | 1 << pin)
    }
}

/// Digital pins driven through the raw gpio driver, so the stop handler can
/// share them with the main loop
pub struct EspIo {
    pins: PinMap,
}

impl EspIo {
    pub fn new(pins: PinMap) -> anyhow::Result<Self> {
        let inputs = [
            Input::Open,
            Input::Close,
            Input::Stop,
            Input::OpenLimit,
            Input::CloseLimit,
            Input::Up,
            Input::Down,
            Input::Select,
        ];
        let outputs = [Output::Open, Output::Close, Output::Stop, Output::Counter];

        let input_conf = gpio_config_t {
            pin_bit_mask: PinMap::mask(inputs.iter().map(|&i| pins.input(i))),
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: false.into(),
            pull_down_en: true.into(),
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            ..Default::default()
        };
        let output_conf = gpio_config_t {
            pin_bit_mask: PinMap::mask(outputs.iter().map(|&o| pins.output(o))),
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: false.into(),
            pull_down_en: false.into(),
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            ..Default::default()
        };

        unsafe {
            esp!(gpio_config(&input_conf))?;
            esp!(gpio_config(&output_conf))?;
        }
        let io = EspIo { pins };
        for output in outputs {
            io.write(output, false);
        }
        log::info!("Pins configured: {:?}", pins);
        Ok(io)
    }
}

impl DigitalIo for EspIo {
    fn read(&self, input: Input) -> bool {
        unsafe { gpio_get_level(self.pins.input(input)) != 0 }
    }

    fn write(&self, output: Output, level: bool) {
        let pin = self.pins.output(output);
        if let Err(e) = esp!(unsafe { gpio_set_level(pin, level.into()) }) {
            log::error!("Could not drive {:?} (gpio {}): {}", output, pin, e);
        }
    }
}
