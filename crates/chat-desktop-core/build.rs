use std::fs;

fn main() {
    // Read app.config.json (same source as the host build.rs)
    // Walk up to find app.config.json from crates/chat-desktop-core/
    let config_path = "../../app.config.json";
    println!("cargo:rerun-if-changed={}", config_path);

    let config_str = fs::read_to_string(config_path).unwrap_or_else(|_| {
        panic!(
            "\n\nBUILD ERROR: app.config.json not found at {}\n\
             Chat Desktop Core must be built from within the chat-desktop tree.\n\n",
            config_path
        )
    });

    let config: serde_json::Value = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        panic!("\n\nBUILD ERROR: Invalid app.config.json: {}\n\n", e)
    });

    let storage = config.get("storage").expect("app.config.json missing 'storage' section");
    let inference = config.get("inference").expect("app.config.json missing 'inference' section");

    let home_folder = storage.get("homeFolderName").and_then(|v| v.as_str())
        .expect("app.config.json: storage.homeFolderName is required");
    let database_file = storage.get("databaseFile").and_then(|v| v.as_str())
        .expect("app.config.json: storage.databaseFile is required");
    let inference_url = inference.get("url").and_then(|v| v.as_str())
        .expect("app.config.json: inference.url is required");
    let default_model = inference.get("defaultModel").and_then(|v| v.as_str())
        .expect("app.config.json: inference.defaultModel is required");

    // Storage and inference defaults; the host bakes identity only
    println!("cargo:rustc-env=CHAT_DESKTOP_HOME_FOLDER={}", home_folder);
    println!("cargo:rustc-env=CHAT_DESKTOP_DATABASE_FILE={}", database_file);
    println!("cargo:rustc-env=CHAT_DESKTOP_INFERENCE_URL={}", inference_url);
    println!("cargo:rustc-env=CHAT_DESKTOP_DEFAULT_MODEL={}", default_model);
}
