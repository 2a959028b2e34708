use core::ffi::c_void;
use std::ptr;

use esp_idf_svc::sys::{
    esp, esp_timer_create, esp_timer_create_args_t, esp_timer_delete,
    esp_timer_dispatch_t_ESP_TIMER_TASK, esp_timer_handle_t, esp_timer_start_once,
    esp_timer_stop, gpio_int_type_t_GPIO_INTR_DISABLE, gpio_int_type_t_GPIO_INTR_POSEDGE,
    gpio_intr_enable, gpio_isr_handler_add, gpio_isr_handler_remove, gpio_num_t,
    gpio_set_intr_type,
};

use crate::stop::StopLatch;

/// Delay between the edge and the debounced read, in µs
const EDGE_DELAY_US: u64 = 1000;

#[link_section = ".iram0.text"]
unsafe extern "C" fn stop_interrupt(arg: *mut c_void) {
    let timer = arg as esp_timer_handle_t;
    // a bouncing edge restarts the wait
    esp_timer_stop(timer);
    esp_timer_start_once(timer, EDGE_DELAY_US);
}

unsafe extern "C" fn edge_settled(arg: *mut c_void) {
    let latch = &*(arg as *const StopLatch);
    latch.on_edge();
}

/// Rising edge interrupt of the stop button.
///
/// The ISR only arms a one-shot timer, the latch itself runs in the timer
/// task where it may sleep and lock. The generic GPIO interrupt service must
/// be installed first.
///
/// Usage:
/// ```ignore
/// esp!(unsafe { gpio_install_isr_service(ESP_INTR_FLAG_IRAM as i32) })?;
/// let _stop = StopInterrupt::install(pins.stop, app.stop_latch())?;
/// ```
pub struct StopInterrupt {
    gpio: gpio_num_t,
    timer: esp_timer_handle_t,
    // the timer callback points into this box
    _latch: Box<StopLatch>,
}

impl StopInterrupt {
    pub fn install(gpio: gpio_num_t, latch: StopLatch) -> anyhow::Result<Self> {
        let latch = Box::new(latch);
        let latch_ptr = &*latch as *const StopLatch as *mut c_void;
        let mut timer: esp_timer_handle_t = ptr::null_mut();

        let timer_config = esp_timer_create_args_t {
            name: b"stop\0".as_ptr() as *const _,
            arg: latch_ptr,
            callback: Some(edge_settled),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            skip_unhandled_events: true,
        };

        unsafe {
            esp!(esp_timer_create(&timer_config, &mut timer))?;
            esp!(gpio_set_intr_type(gpio, gpio_int_type_t_GPIO_INTR_POSEDGE))?;
            esp!(gpio_isr_handler_add(
                gpio,
                Some(stop_interrupt),
                timer as *mut c_void
            ))?;
            esp!(gpio_intr_enable(gpio))?;
        }
        log::info!("Stop interrupt armed on gpio {}", gpio);

        Ok(StopInterrupt {
            gpio,
            timer,
            _latch: latch,
        })
    }
}

impl Drop for StopInterrupt {
    fn drop(&mut self) {
        unsafe {
            gpio_set_intr_type(self.gpio, gpio_int_type_t_GPIO_INTR_DISABLE);
            gpio_isr_handler_remove(self.gpio);
            esp_timer_stop(self.timer);
            esp_timer_delete(self.timer);
        }
    }
}
