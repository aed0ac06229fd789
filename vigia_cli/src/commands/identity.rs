//! Identity key command

use anyhow::Result;
use console::style;
use vigia_common::{digits_only, normalize_name, normalize_phone, IdentityKey};

/// Print the identity key the server would derive for these fields
pub fn run(name: &str, national_id: &str, phone: &str) -> Result<()> {
    let key = IdentityKey::from_parts(name, national_id, phone)?;

    println!("{} {}", style("Name:").dim(), normalize_name(name));
    println!("{} {}", style("National ID:").dim(), digits_only(national_id));
    println!("{} {}", style("Phone:").dim(), normalize_phone(phone));
    println!("{}", style(key.as_str()).green().bold());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_identity() {
        let err = run(" ", "", "()").unwrap_err();
        assert!(err.downcast_ref::<vigia_common::IdentityError>().is_some());
    }

    #[test]
    fn test_accepts_partial_identity() {
        assert!(run("", "", "11 99999-9999").is_ok());
    }
}
