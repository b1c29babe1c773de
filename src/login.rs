use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::credentials::{self, Login, SecretStore};
use crate::logging::Logger;

/// Asks for the account on the terminal and saves it in `store`.
pub fn run(store: &dyn SecretStore, log: &Logger) -> Result<()> {
    let stdin = io::stdin();
    let login = prompt_login(stdin.lock(), io::stdout(), || {
        rpassword::prompt_password("Password: ")
    })?;

    login.store(store).context("storing credentials")?;
    credentials::validate(store).context("reading stored credentials back")?;

    log.info(format_args!("credentials for {} stored", login.username));
    Ok(())
}

/// Server addresses may be left blank when the configuration file has them.
pub fn prompt_login<R, W, P>(mut input: R, mut output: W, read_password: P) -> Result<Login>
where
    R: BufRead,
    W: Write,
    P: FnOnce() -> io::Result<String>,
{
    let imap_server_address = prompt(&mut input, &mut output, "IMAP server address (host:port, optional): ")?;
    let smtp_server_address = prompt(&mut input, &mut output, "SMTP server address (host:port, optional): ")?;
    let username = prompt(&mut input, &mut output, "Username: ")?;
    let password = read_password().context("reading password")?;

    Ok(Login {
        username,
        password,
        imap_server_address: Some(imap_server_address).filter(|a| !a.is_empty()),
        smtp_server_address: Some(smtp_server_address).filter(|a| !a.is_empty()),
    })
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> Result<String> {
    write!(output, "{message}")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("reading answer")?;
    Ok(line.trim().to_string())
}
