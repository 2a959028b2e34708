fn main() {
    // Only the device build needs the ESP-IDF environment
    if std::env::var_os("CARGO_FEATURE_HAL").is_some() {
        embuild::espidf::sysenv::output();
    }
}
