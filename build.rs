fn main() {
    // Only run the ESP-IDF build system when targeting the ESP32 (Xtensa).
    // Build scripts run on the host, so check the TARGET env var.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
