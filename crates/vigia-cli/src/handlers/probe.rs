//! Probe command handler

use crate::commands::ProbeArgs;
use crate::error::{CliError, CliResult};
use crate::output::Output;
use std::time::Duration;
use vigia::{Locator, PageObject, PageObjectBuilder, SimplePageObject};

/// Page object for the probed path
pub fn probe_page(args: &ProbeArgs) -> CliResult<SimplePageObject> {
    if !args.path.starts_with('/') {
        return Err(CliError::invalid_argument(format!(
            "probe path {:?} must start with '/'",
            args.path
        )));
    }
    if args.timeout_ms == 0 {
        return Err(CliError::invalid_argument("--timeout-ms must be positive"));
    }
    let page = PageObjectBuilder::new()
        .with_name(format!("probe {}", args.path))
        .with_route(args.path.clone())
        .with_ready(Locator::new(&args.ready))
        .with_load_timeout(Duration::from_millis(args.timeout_ms))
        .build();
    // surfaces malformed routes before a browser is launched
    page.path()?;
    Ok(page)
}

/// Execute the probe command
#[cfg(feature = "browser")]
pub fn execute_probe(out: &Output, args: &ProbeArgs) -> CliResult<()> {
    use std::sync::Arc;
    use vigia::{BrowserDriver, CdpDriver, FailureReport, Session, DEFAULT_ACTOR};

    let config = super::config::load_harness_config(args.file.as_deref())?;
    let page = probe_page(args)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let driver: Arc<dyn BrowserDriver> =
            Arc::new(CdpDriver::launch(&config.browser, &config.base_url).await?);
        let session = Session::start(Arc::clone(&driver), config).await?;
        let window = session.current().await?;
        let started = std::time::Instant::now();
        let visited = window.visit(&page).await;
        let url = window.current_url().await.unwrap_or_default();
        let shot = match &args.screenshot {
            Some(path) => {
                let shot = window.screenshot().await?;
                std::fs::write(path, &shot.data)?;
                Some(shot)
            }
            None => None,
        };
        session.close().await?;
        match visited {
            Ok(()) => {
                out.field("url", &url);
                if let Some(path) = &args.screenshot {
                    out.field("screenshot", &path.display().to_string());
                }
                out.success(&format!(
                    "{} ready in {:.2}s",
                    args.ready,
                    started.elapsed().as_secs_f64()
                ));
                Ok(())
            }
            Err(e) => {
                let mut report = FailureReport::from_error(page.page_name(), &e, started.elapsed())
                    .with_url(url)
                    .with_actor(DEFAULT_ACTOR);
                if let Some(shot) = &shot {
                    report = report.with_screenshot(shot);
                }
                out.failure(&report.render());
                Err(e.into())
            }
        }
    })
}

/// Execute the probe command
#[cfg(not(feature = "browser"))]
pub fn execute_probe(_out: &Output, args: &ProbeArgs) -> CliResult<()> {
    probe_page(args)?;
    Err(CliError::FeatureDisabled {
        command: "probe",
        feature: "browser",
    })
}
