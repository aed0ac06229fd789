//! Offer link command

use anyhow::{Context, Result};
use url::Url;

/// Print `url` with the offer secret appended to its query
pub fn run(url: &str, secret: &str, param: &str) -> Result<()> {
    println!("{}", build(url, secret, param)?);
    Ok(())
}

fn build(url: &str, secret: &str, param: &str) -> Result<String> {
    if secret.is_empty() {
        anyhow::bail!("Refusing to build a link with an empty secret");
    }
    if param.is_empty() {
        anyhow::bail!("Secret parameter name must not be empty");
    }

    let mut url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    url.query_pairs_mut().append_pair(param, secret);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_secret_after_existing_params() {
        assert_eq!(
            build("https://shop.example/oferta?utm_source=ig&utm_campaign=x", "s3cret", "k").unwrap(),
            "https://shop.example/oferta?utm_source=ig&utm_campaign=x&k=s3cret"
        );
        assert_eq!(
            build("https://shop.example/oferta", "a b&c", "k").unwrap(),
            "https://shop.example/oferta?k=a+b%26c"
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(build("https://shop.example/oferta", "", "k").is_err());
        assert!(build("https://shop.example/oferta", "s3cret", "").is_err());
        assert!(build("/oferta", "s3cret", "k").is_err());
    }
}
