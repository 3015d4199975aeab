//! Doubles command handler

use crate::commands::DoublesArgs;
use crate::error::{CliError, CliResult};
use crate::output::Output;
use vigia::doubles::{OAuthDouble, OAuthIdentity, SsoDouble, SsoIdentity};

/// SSO and OAuth doubles seeded with one identity
#[derive(Debug)]
pub struct RunningDoubles {
    /// SSO provider
    pub sso: SsoDouble,
    /// OAuth2 provider
    pub oauth: OAuthDouble,
}

impl RunningDoubles {
    /// Start both doubles, each asserting the identity from `args`
    pub async fn start(args: &DoublesArgs) -> CliResult<Self> {
        if args.username.trim().is_empty() {
            return Err(CliError::invalid_argument("--username must not be empty"));
        }
        if !args.email.contains('@') {
            return Err(CliError::invalid_argument(format!(
                "--email {:?} is not an address",
                args.email
            )));
        }

        let mut sso = SsoDouble::new(args.secret.clone());
        sso.will_assert(SsoIdentity::new(&args.username, &args.email, &args.username));
        sso.start().await?;

        let mut oauth = OAuthDouble::default();
        oauth.will_assert(OAuthIdentity::new(&args.username, &args.email, &args.username));
        oauth.start().await?;

        Ok(Self { sso, oauth })
    }

    /// Endpoint table shown to the user
    pub fn endpoints(&self) -> CliResult<Vec<(&'static str, String)>> {
        Ok(vec![
            ("sso", self.sso.provider_url()?),
            ("authorize", self.oauth.url("/authorize")?),
            ("token", self.oauth.url("/token")?),
            ("userinfo", self.oauth.url("/userinfo")?),
            ("client_id", self.oauth.client().client_id.clone()),
        ])
    }

    /// Stop both doubles
    pub async fn stop(&mut self) -> CliResult<()> {
        self.sso.stop().await?;
        self.oauth.stop().await?;
        Ok(())
    }
}

/// Execute the doubles command
pub fn execute_doubles(out: &Output, args: &DoublesArgs) -> CliResult<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let mut doubles = RunningDoubles::start(args).await?;
        for (label, value) in doubles.endpoints()? {
            out.field(label, &value);
        }
        if args.once {
            return doubles.stop().await;
        }
        out.success("service doubles running; Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down service doubles");
        doubles.stop().await
    })
}
