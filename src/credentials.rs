//! Zendesk login credentials: environment first, then the config file, then
//! an interactive prompt.

use std::io::{BufRead, IsTerminal, Write};

pub const EMAIL_ENV: &str = "ZENDESK_EMAIL";
pub const PASSWORD_ENV: &str = "ZENDESK_PASS";

#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    #[cfg(test)]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Pick the first non-blank value, trimmed.
fn first_present(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Resolve credentials with precedence environment > config > prompt.
///
/// `.env` in the working directory is loaded first. Prompts only happen on a
/// terminal; missing email or password after all sources is an error.
pub fn resolve(config_email: Option<&str>, config_password: Option<&str>) -> anyhow::Result<Credentials> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!("Failed to load .env: {}", e);
        }
    }
    let env_email = std::env::var(EMAIL_ENV).ok();
    let env_password = std::env::var(PASSWORD_ENV).ok();

    let interactive = std::io::stdin().is_terminal();

    let email = match first_present(&[env_email.as_deref(), config_email]) {
        Some(e) => Some(e),
        None if interactive => prompt_line("Zendesk e-mail: ")?,
        None => None,
    };
    let password = match first_present(&[env_password.as_deref(), config_password]) {
        Some(p) => Some(p),
        None if interactive => {
            let p = rpassword::prompt_password("Zendesk password: ")?;
            first_present(&[Some(p.as_str())])
        }
        None => None,
    };

    match (email, password) {
        (Some(email), Some(password)) => Ok(Credentials { email, password }),
        _ => anyhow::bail!(
            "Missing credentials: set {} and {} (or auth.email / auth.password in the config)",
            EMAIL_ENV,
            PASSWORD_ENV
        ),
    }
}

fn prompt_line(prompt: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(first_present(&[Some(line.as_str())]))
}
