// Helper for operators maintaining the users file: prints the argon2
// hash for a password supplied as the single argument.

use anyhow::{bail, Result};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(password) = args.next() else {
        bail!("usage: groundwork-hash-password <password>");
    };
    println!("{}", groundwork_storage::hash_password(&password)?);
    Ok(())
}
