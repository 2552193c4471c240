use std::env;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=PLATNAV_EMBED_LEVEL_PATH");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let out_path = Path::new(&out_dir).join("platnav_embedded_level.json");

    let content = match env::var("PLATNAV_EMBED_LEVEL_PATH") {
        Ok(path) if !path.is_empty() => {
            println!("cargo:rerun-if-changed={path}");
            fs::read_to_string(&path).unwrap_or_else(|e| {
                println!("cargo:warning=could not read embedded level {path}: {e}");
                "{}".to_string()
            })
        }
        _ => "{}".to_string(),
    };

    fs::write(out_path, content).expect("failed to write embedded level");
}
