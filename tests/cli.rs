use std::fs;
use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd
        }
    };
}

const SMALL: [&str; 8] =
    ["--tile-size", "32", "--stride", "32", "--input-size", "16", "--thumbnail-grid", "2"];

fn write_image(path: &Path, size: u32, value: u8) -> Result<()> {
    RgbImage::from_pixel(size, size, Rgb([value, value, value])).save(path)?;
    Ok(())
}

/// `crack` holds dark images, `scratch` bright ones.
#[fixture]
fn dataset() -> assert_fs::TempDir {
    let root = assert_fs::TempDir::new().unwrap();
    for (defect_type, values) in [("crack", [10, 20, 30]), ("scratch", [220, 230, 240])] {
        let dir = root.path().join(defect_type);
        fs::create_dir(&dir).unwrap();
        for (i, value) in values.into_iter().enumerate() {
            write_image(&dir.join(format!("{}_{}.png", defect_type, i)), 64, value).unwrap();
        }
    }
    root
}

#[rstest]
fn ingest_then_search(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let query = conf_dir.path().join("query.png");
    write_image(&query, 64, 25)?;

    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(SMALL)
        .assert()
        .success()
        .stdout(predicate::str::contains("added 6 images (24 tiles), skipped 0"));

    assert!(conf_dir.path().join("defect.index").exists());
    assert!(conf_dir.path().join("defect.meta").exists());

    cargo_run!("defsearch", "-c", conf_dir.path(), "search", &query)
        .args(SMALL)
        .args(["-k", "13"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verdict: crack"))
        .stdout(predicate::str::contains("runner-up: scratch"));

    Ok(())
}

#[rstest]
fn search_json(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let query = conf_dir.path().join("query.png");
    write_image(&query, 32, 235)?;

    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(SMALL)
        .assert()
        .success();

    let output = cargo_run!("defsearch", "-c", conf_dir.path(), "search", &query)
        .args(SMALL)
        .args(["-k", "2", "--output-format", "json"])
        .assert()
        .success();
    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout)?;
    assert_eq!(json["outcome"], "verdict");
    assert_eq!(json["defect_type"], "scratch");
    assert_eq!(json["hits"].as_array().map(Vec::len), Some(2));

    Ok(())
}

#[test]
fn search_without_store() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let query = conf_dir.path().join("query.png");
    write_image(&query, 32, 0)?;

    cargo_run!("defsearch", "-c", conf_dir.path(), "search", &query)
        .args(SMALL)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    Ok(())
}

#[rstest]
fn ingest_twice_appends(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    for _ in 0..2 {
        cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
            .args(SMALL)
            .assert()
            .success();
    }

    cargo_run!("defsearch", "-c", conf_dir.path(), "inspect", "-n", "2")
        .assert()
        .success()
        .stdout(predicate::str::contains("vectors: 48"))
        .stdout(predicate::str::contains("0\tcrack\tcrack_0.png\t0,0"))
        .stdout(predicate::str::contains("1\tcrack\tcrack_0.png\t32,0"));

    Ok(())
}

#[rstest]
fn ingest_rejects_other_dimension(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(SMALL)
        .assert()
        .success();
    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(["--tile-size", "32", "--stride", "32", "--input-size", "16", "--thumbnail-grid", "4"])
        .assert()
        .failure();

    Ok(())
}

#[rstest]
fn export_npy(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let output = conf_dir.path().join("vectors.npy");

    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(SMALL)
        .assert()
        .success();
    cargo_run!("defsearch", "-c", conf_dir.path(), "export", "-o", &output).assert().success();

    let data: ndarray::Array2<f32> = ndarray_npy::read_npy(&output)?;
    assert_eq!(data.dim(), (24, 12));

    Ok(())
}

#[rstest]
fn chat_session(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let queries = conf_dir.path().join("queries");
    fs::create_dir(&queries)?;
    write_image(&queries.join("R1xC22-4.png"), 64, 15)?;

    cargo_run!("defsearch", "-c", conf_dir.path(), "ingest", dataset.path())
        .args(SMALL)
        .assert()
        .success();

    cargo_run!("defsearch", "-c", conf_dir.path(), "chat", &queries)
        .args(SMALL)
        .write_stdin("what is wrong with 'R1xC22-4' ?\nmissing_file\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("verdict: crack"))
        .stdout(predicate::str::contains("no image in"));

    Ok(())
}
