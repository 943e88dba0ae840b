fn main() {
    // Load .env file for the access point defaults
    load_env_config();

    // Date reported by the version request
    emit_build_date();

    // Host builds (unit tests) have no linker scripts to add
    if std::env::var_os("CARGO_FEATURE_ESP32C3").is_some() {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    println!("cargo:rerun-if-env-changed=YOLKA_AP_SSID");
    println!("cargo:rerun-if-env-changed=YOLKA_AP_PASSWORD");

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Empty values fall back to the factory defaults
    let ap_ssid = env::var("YOLKA_AP_SSID")
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "WIFI_YOLKA".to_string());
    let ap_password = env::var("YOLKA_AP_PASSWORD")
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "0123456789".to_string());

    if ap_ssid.len() > 64 {
        println!("cargo:warning=YOLKA_AP_SSID is longer than 64 bytes and will be truncated by the modem");
    }
    if ap_password.len() < 8 {
        println!("cargo:warning=YOLKA_AP_PASSWORD is shorter than 8 characters, WPA2 will reject it");
    }

    // Set environment variables for the compilation
    println!("cargo:rustc-env=YOLKA_AP_SSID={}", ap_ssid);
    println!("cargo:rustc-env=YOLKA_AP_PASSWORD={}", ap_password);
}

/// Emits the build date as `YOLKA_BUILD_DAY`/`MONTH`/`YEAR`.
/// `SOURCE_DATE_EPOCH` overrides the clock for reproducible builds.
fn emit_build_date() {
    use std::time::{SystemTime, UNIX_EPOCH};

    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    let seconds = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });
    let (year, month, day) = civil_from_days((seconds / 86_400) as i64);

    println!("cargo:rustc-env=YOLKA_BUILD_DAY={}", day);
    println!("cargo:rustc-env=YOLKA_BUILD_MONTH={}", month);
    println!("cargo:rustc-env=YOLKA_BUILD_YEAR={}", year);
}

/// Gregorian date of a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_defmt_timestamp" => {
                    eprintln!();
                    eprintln!("💡 `defmt` not found - make sure `defmt.x` is added as a linker script and you have included `use defmt_rtt as _;`");
                    eprintln!();
                }
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    if let Ok(exe) = std::env::current_exe() {
        println!(
            "cargo:rustc-link-arg=--error-handling-script={}",
            exe.display()
        );
    }
}
