use tokenkeeper::settings::*;

fn main() -> anyhow::Result<()> {
    // Load settings from the default location
    let project_settings = parse_settings(None)?;
    println!("Loaded settings: {:?}", project_settings);

    // Attempt to load from an invalid path (expected to fail)
    let is_err = parse_settings(Some("")).is_err();
    println!("Error on invalid path: {:?}", is_err);

    // Environment overrides win over the file
    // $ APP_JWT__ACCESS_TTL_SECS=60 cargo run --bin settings_demo -- --settings=settings/dev.toml
    let cli = Cli::parse();
    let project_settings = parse_settings(cli.settings.as_deref())?;
    println!("access ttl: {}s", project_settings.jwt.access_ttl_secs);
    println!("rate limits: {:?}", project_settings.rate_limit);

    Ok(())
}
