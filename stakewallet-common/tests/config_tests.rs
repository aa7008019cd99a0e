use anyhow::Result;
use stakewallet_common::config::{self, Config};
use stakewallet_common::tx_builder::BuildSettings;
use std::fs;
use tempfile::TempDir;

fn setup_test_config(content: &str) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, content).expect("Failed to write test config");
    (temp_dir, config_path)
}

#[test]
fn test_partial_file_fills_defaults() -> Result<()> {
    let (_dir, path) = setup_test_config(
        r#"
        [wallet]
        reserve_balance = 5000
        change_to_input_address = true

        [policy]
        contract_min_fee = 250000
    "#,
    );

    let config = Config::load(&path)?;
    assert_eq!(config.wallet.reserve_balance, 5000);
    assert!(config.wallet.change_to_input_address);
    assert_eq!(config.policy.contract_min_fee, 250_000);
    assert_eq!(config.policy.min_tx_fee, Config::default().policy.min_tx_fee);
    assert_eq!(config.selection.approximation_iterations, 1000);

    let settings = BuildSettings::from_config(&config);
    assert!(settings.change_to_input_address);
    assert_eq!(settings.max_iterations, config.policy.max_fee_iterations);
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("stakewallet.toml");

    let mut config = Config::default();
    config.wallet.transaction_fee = 20_000;
    config.staking.stake_min_age = 3_600;
    config.save(&path)?;

    let loaded = Config::load(&path)?;
    assert_eq!(loaded.wallet.transaction_fee, 20_000);
    assert_eq!(loaded.staking.stake_min_age, 3_600);
    assert_eq!(
        loaded.staking.maturity_window(),
        config.staking.maturity_window()
    );
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() {
    let (_dir, path) = setup_test_config(
        r#"
        [selection]
        cent = 0
    "#,
    );
    assert!(Config::load(&path).is_err());

    let (_dir, path) = setup_test_config("[wallet\nbroken");
    assert!(Config::load(&path).is_err());
}

#[test]
fn test_ensure_config_exists_writes_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("nested").join("config.toml");

    config::ensure_config_exists(&path)?;
    assert!(path.exists());
    let config = Config::load(&path)?;
    assert_eq!(config.wallet.key_pool_size, 100);

    // An existing file is left alone
    fs::write(&path, "[wallet]\nkey_pool_size = 7\n")?;
    config::ensure_config_exists(&path)?;
    assert_eq!(Config::load(&path)?.wallet.key_pool_size, 7);
    Ok(())
}
