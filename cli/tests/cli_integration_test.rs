use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn tmp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fmwave-cli-{}", std::process::id()));
    fs::create_dir_all(&dir).ok();
    dir.join(name)
}

fn run_fmwave(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fmwave"))
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .expect("Failed to execute fmwave")
}

fn combined(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string() + &String::from_utf8_lossy(&output.stdout)
}

#[test]
fn test_plan_default_carrier() {
    let output = run_fmwave(&["plan"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "plan failed: {}", combined(&output));
    assert!(stdout.contains("Output divider:   1 (/6)"), "got: {}", stdout);
    assert!(stdout.contains("Integer part:     8"), "got: {}", stdout);
    assert!(stdout.contains("Fraction:         0xC000"), "got: {}", stdout);
    assert!(stdout.contains("Deviation limit:  737 LSB"), "got: {}", stdout);
}

#[test]
fn test_plan_rejects_unreachable_carrier() {
    let output = run_fmwave(&["plan", "--frequency", "1000000"]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("Configuration"));
}

#[test]
fn test_transmit_tone_on_every_backend() {
    for backend in ["direct", "retuned", "pulse-train"] {
        let output = run_fmwave(&[
            "transmit",
            "--backend",
            backend,
            "--tone",
            "1000",
            "--seconds",
            "0.5",
            "--virtual-clock",
        ]);
        let text = combined(&output);

        assert!(output.status.success(), "{} failed: {}", backend, text);
        assert!(text.contains("Samples:            4000"), "{}: {}", backend, text);
        assert!(text.contains("Apply errors:       0"), "{}: {}", backend, text);
    }
}

#[test]
fn test_transmit_wav_file() {
    let wav = tmp_path("tone.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
    for i in 0..4_410 {
        let value = ((i as f32 * 0.1).sin() * 20_000.0) as i16;
        writer.write_sample(value).unwrap();
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();

    let output = run_fmwave(&["transmit", "--wav", wav.to_str().unwrap(), "--virtual-clock"]);
    let text = combined(&output);

    assert!(output.status.success(), "transmit failed: {}", text);
    // 0.1 s of CD audio at the default 8 kHz
    assert!(text.contains("Samples:            800"), "got: {}", text);
    fs::remove_file(&wav).ok();
}

#[test]
fn test_config_file_with_flag_override() {
    let config = tmp_path("config.json");
    fs::write(
        &config,
        r#"{"frequency_hz": 90000000, "backend": "pulse-train", "sample_rate": 16000}"#,
    )
    .unwrap();

    let output = run_fmwave(&[
        "transmit",
        "--config",
        config.to_str().unwrap(),
        "--frequency",
        "100000000",
        "--seconds",
        "0.1",
        "--virtual-clock",
    ]);
    let text = combined(&output);

    assert!(output.status.success(), "transmit failed: {}", text);
    assert!(text.contains("Carrier 100000000 Hz via pulse-train backend"), "got: {}", text);
    assert!(text.contains("Samples:            1600"), "got: {}", text);
    fs::remove_file(&config).ok();
}

#[test]
fn test_invalid_config_file_reported() {
    let config = tmp_path("broken.json");
    fs::write(&config, r#"{"carrier": 1}"#).unwrap();

    let output = run_fmwave(&["transmit", "--config", config.to_str().unwrap(), "--virtual-clock"]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("ConfigParse"));
    fs::remove_file(&config).ok();
}

#[test]
fn test_unknown_backend_rejected() {
    let output = run_fmwave(&["transmit", "--backend", "laser", "--virtual-clock"]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("unknown backend 'laser'"));
}
