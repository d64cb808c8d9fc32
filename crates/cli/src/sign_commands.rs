//! Local webhook testing: compute the signature the telephony provider would
//! send for a request, using the configured auth token.

use {
    anyhow::{Context, Result, bail},
    clap::Args,
    nexza_config::NexzaConfig,
    nexza_gateway::auth::{compute_signature, signature_base},
    secrecy::ExposeSecret,
};

#[derive(Args)]
pub struct SignArgs {
    /// Full public URL the provider calls, including any query string.
    #[arg(long)]
    pub url: String,
    /// Form parameter as `key=value`; repeat for each parameter.
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
    /// Also print the string that was signed.
    #[arg(long)]
    pub show_base: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

pub fn run(config: &NexzaConfig, args: &SignArgs) -> Result<()> {
    let Some(token) = config.channels.telephony.auth_token.as_ref() else {
        bail!("no telephony auth token configured (set TWILIO_AUTH_TOKEN or channels.telephony.auth_token)");
    };
    let token = token.expose_secret().trim();
    if token.is_empty() {
        bail!("telephony auth token is empty");
    }

    if args.show_base {
        eprintln!("{}", signature_base(&args.url, &args.params));
    }
    let signature =
        compute_signature(token, &args.url, &args.params).context("failed to compute signature")?;
    println!("{signature}");
    Ok(())
}
