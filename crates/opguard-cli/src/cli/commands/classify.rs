//! `opguard classify` – run the classifier on a described failure.

use anyhow::{bail, Result};
use clap::Args;
use opguard_core::classify::{classify, ClassifyOverrides};
use opguard_core::RawError;

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// HTTP status of the failed response.
    #[arg(long)]
    pub status: Option<u16>,
    /// Error code reported by the backend.
    #[arg(long)]
    pub code: Option<String>,
    /// Free-text error message.
    #[arg(long)]
    pub message: Option<String>,
    /// The action timed out.
    #[arg(long, conflicts_with_all = ["status", "code"])]
    pub timeout: bool,
    /// Provenance recorded on the result.
    #[arg(long)]
    pub context: Option<String>,
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl ClassifyArgs {
    pub fn raw_error(&self) -> Result<RawError> {
        let raw = match (self.timeout, self.status, &self.code, &self.message) {
            (true, ..) => RawError::timeout(),
            (false, Some(status), code, message) => RawError::Http {
                status,
                code: code.clone(),
                message: message.clone(),
            },
            (false, None, Some(code), message) => RawError::Coded {
                code: code.clone(),
                message: message.clone(),
            },
            (false, None, None, Some(message)) => RawError::Message(message.clone()),
            (false, None, None, None) => {
                bail!("nothing to classify: pass --status, --code, --message or --timeout")
            }
        };
        Ok(raw)
    }
}

pub fn run_classify(args: &ClassifyArgs) -> Result<()> {
    let overrides = ClassifyOverrides {
        context: args.context.clone(),
        user_action: None,
    };
    let record = classify(&args.raw_error()?, Some(&overrides));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    println!("code:      {}", record.code);
    println!("category:  {}", record.category);
    println!("severity:  {}", record.severity);
    println!("message:   {}", record.message);
    if let Some(action) = &record.user_action {
        println!("action:    {action}");
    }
    if let Some(context) = &record.context {
        println!("context:   {context}");
    }
    println!("transient: {}", record.is_transient());
    Ok(())
}
