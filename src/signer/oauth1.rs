//! OAuth 1.0a HMAC-SHA1 request signing (RFC 5849)
//!
//! Everything here is pure: nonce and timestamp are inputs, so a signature is
//! fully determined by its arguments.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use url::Url;

use crate::error::CredentialError;
use crate::store::Credential;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const OAUTH_VERSION: &str = "1.0";

/// The four values needed to sign a request
#[derive(Clone)]
pub struct Oauth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl std::fmt::Debug for Oauth1Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oauth1Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .field("token_secret", &"[REDACTED]")
            .finish()
    }
}

impl Oauth1Credentials {
    /// Pull the OAuth 1.0a set out of a stored record.
    ///
    /// Empty strings count as missing. Every absent field is reported, in a
    /// fixed order.
    pub fn from_credential(credential: &Credential) -> Result<Self, CredentialError> {
        fn present(value: &Option<String>) -> Option<&String> {
            value.as_ref().filter(|v| !v.is_empty())
        }

        let fields = [
            ("consumer_key", present(&credential.consumer_key)),
            ("consumer_secret", present(&credential.consumer_secret)),
            ("oauth1_access_token", present(&credential.oauth1_access_token)),
            ("access_token_secret", present(&credential.access_token_secret)),
        ];

        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(CredentialError::MissingCredentials { missing });
        }

        let [consumer_key, consumer_secret, token, token_secret] =
            fields.map(|(_, value)| value.cloned().unwrap_or_default());

        Ok(Self {
            consumer_key,
            consumer_secret,
            token,
            token_secret,
        })
    }
}

/// RFC 3986 percent-encoding: only `A-Z a-z 0-9 - . _ ~` pass through
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Scheme and host lowercased, default port dropped, no query or fragment
pub fn base_string_uri(url: &Url) -> String {
    let mut uri = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        let _ = write!(uri, ":{}", port);
    }
    uri.push_str(url.path());
    uri
}

/// Encode every pair, sort by encoded key then value, join as `k=v&...`
pub fn parameter_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// `METHOD&enc(base uri)&enc(parameter string)`
pub fn signature_base_string(method: &str, url: &Url, parameter_string: &str) -> String {
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_string_uri(url)),
        percent_encode(parameter_string)
    )
}

/// `enc(consumer_secret)&enc(token_secret)`
pub fn signing_key(consumer_secret: &str, token_secret: &str) -> String {
    format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    )
}

fn hmac_sha1_base64(key: &str, message: &str) -> Result<String, CredentialError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| CredentialError::SigningError(format!("invalid HMAC key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Output of a signing pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Full `Authorization` header value, `OAuth k="v", ...`
    pub authorization: String,
    pub signature: String,
    pub base_string: String,
}

/// Sign with a caller-supplied nonce and timestamp.
///
/// `params` are the request's body/form parameters; query parameters are taken
/// from `url`.
pub fn sign_request_with(
    credentials: &Oauth1Credentials,
    method: &str,
    url: &Url,
    params: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> Result<SignedRequest, CredentialError> {
    let timestamp = timestamp.to_string();
    let mut oauth_params: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), credentials.consumer_key.clone()),
        ("oauth_nonce".into(), nonce.to_string()),
        ("oauth_signature_method".into(), SIGNATURE_METHOD.into()),
        ("oauth_timestamp".into(), timestamp),
        ("oauth_token".into(), credentials.token.clone()),
        ("oauth_version".into(), OAUTH_VERSION.into()),
    ];

    let mut all_params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    all_params.extend(params.iter().cloned());
    all_params.extend(oauth_params.iter().cloned());

    let base_string = signature_base_string(method, url, &parameter_string(&all_params));
    let key = signing_key(&credentials.consumer_secret, &credentials.token_secret);
    let signature = hmac_sha1_base64(&key, &base_string)?;

    oauth_params.push(("oauth_signature".into(), signature.clone()));
    oauth_params.sort();

    let authorization = format!(
        "OAuth {}",
        oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(SignedRequest {
        authorization,
        signature,
        base_string,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Worked example from Twitter's "Creating a signature" guide
    fn twitter_docs_credentials() -> Oauth1Credentials {
        Oauth1Credentials {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".into(),
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".into(),
            token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".into(),
            token_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".into(),
        }
    }

    fn twitter_docs_url() -> Url {
        Url::parse("https://api.twitter.com/1.1/statuses/update.json?include_entities=true")
            .unwrap()
    }

    fn twitter_docs_params() -> Vec<(String, String)> {
        vec![(
            "status".into(),
            "Hello Ladies + Gentlemen, a signed OAuth request!".into(),
        )]
    }

    const NONCE: &str = "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg";
    const TIMESTAMP: i64 = 1318622958;

    #[test]
    fn reproduces_published_twitter_signature() {
        let signed = sign_request_with(
            &twitter_docs_credentials(),
            "post",
            &twitter_docs_url(),
            &twitter_docs_params(),
            NONCE,
            TIMESTAMP,
        )
        .unwrap();

        assert_eq!(signed.signature, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
        assert!(signed.base_string.starts_with(
            "POST&https%3A%2F%2Fapi.twitter.com%2F1.1%2Fstatuses%2Fupdate.json&include_entities%3Dtrue%26oauth_consumer_key"
        ));
        assert_eq!(
            signed.authorization,
            "OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\", \
             oauth_nonce=\"kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg\", \
             oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\", \
             oauth_signature_method=\"HMAC-SHA1\", \
             oauth_timestamp=\"1318622958\", \
             oauth_token=\"370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb\", \
             oauth_version=\"1.0\""
        );
    }

    #[test]
    fn identical_inputs_sign_identically() {
        let sign = || {
            sign_request_with(
                &twitter_docs_credentials(),
                "POST",
                &twitter_docs_url(),
                &twitter_docs_params(),
                NONCE,
                TIMESTAMP,
            )
            .unwrap()
        };
        assert_eq!(sign(), sign());
    }

    #[test]
    fn any_changed_input_changes_signature() {
        let baseline = sign_request_with(
            &twitter_docs_credentials(),
            "POST",
            &twitter_docs_url(),
            &twitter_docs_params(),
            NONCE,
            TIMESTAMP,
        )
        .unwrap()
        .signature;

        let other_url =
            Url::parse("https://api.twitter.com/1.1/statuses/update.json?include_entities=false")
                .unwrap();
        let changed_url = sign_request_with(
            &twitter_docs_credentials(),
            "POST",
            &other_url,
            &twitter_docs_params(),
            NONCE,
            TIMESTAMP,
        )
        .unwrap()
        .signature;

        let changed_param = sign_request_with(
            &twitter_docs_credentials(),
            "POST",
            &twitter_docs_url(),
            &[(
                "status".into(),
                "Hello Ladies + Gentlemen, a signed OAuth request?".into(),
            )],
            NONCE,
            TIMESTAMP,
        )
        .unwrap()
        .signature;

        let mut other_secret = twitter_docs_credentials();
        other_secret.token_secret.push('x');
        let changed_secret = sign_request_with(
            &other_secret,
            "POST",
            &twitter_docs_url(),
            &twitter_docs_params(),
            NONCE,
            TIMESTAMP,
        )
        .unwrap()
        .signature;

        let mut other_consumer = twitter_docs_credentials();
        other_consumer.consumer_secret.replace_range(0..1, "j");
        let changed_consumer = sign_request_with(
            &other_consumer,
            "POST",
            &twitter_docs_url(),
            &twitter_docs_params(),
            NONCE,
            TIMESTAMP,
        )
        .unwrap()
        .signature;

        for changed in [changed_url, changed_param, changed_secret, changed_consumer] {
            assert_ne!(changed, baseline);
        }
    }

    #[test]
    fn percent_encoding_follows_rfc3986() {
        assert_eq!(percent_encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
        assert_eq!(percent_encode("An encoded string!"), "An%20encoded%20string%21");
        assert_eq!(percent_encode("Dogs, Cats & Mice"), "Dogs%2C%20Cats%20%26%20Mice");
        assert_eq!(percent_encode("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(percent_encode("☃"), "%E2%98%83");
    }

    #[test]
    fn parameters_sort_by_key_then_value() {
        let params = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "z".to_string()),
            ("a".to_string(), "b".to_string()),
        ];
        assert_eq!(parameter_string(&params), "a=b&a=z&b=2");
    }

    #[test]
    fn base_uri_normalises_scheme_host_and_port() {
        let url = Url::parse("HTTPS://Upload.Twitter.com:443/1.1/media/upload.json?command=INIT#x")
            .unwrap();
        assert_eq!(
            base_string_uri(&url),
            "https://upload.twitter.com/1.1/media/upload.json"
        );

        let custom_port = Url::parse("http://example.com:8080/r%20v/X?id=123").unwrap();
        assert_eq!(base_string_uri(&custom_port), "http://example.com:8080/r%20v/X");
    }

    fn credential_with(
        consumer_key: Option<&str>,
        consumer_secret: Option<&str>,
        token: Option<&str>,
        token_secret: Option<&str>,
    ) -> Credential {
        let mut credential = Credential::from_fields(
            "u1",
            crate::models::Platform::Twitter,
            "111",
            Default::default(),
            chrono::Utc::now(),
        );
        credential.consumer_key = consumer_key.map(str::to_string);
        credential.consumer_secret = consumer_secret.map(str::to_string);
        credential.oauth1_access_token = token.map(str::to_string);
        credential.access_token_secret = token_secret.map(str::to_string);
        credential
    }

    #[test]
    fn missing_token_secret_is_reported() {
        let credential = credential_with(Some("ck"), Some("cs"), Some("tok"), None);

        match Oauth1Credentials::from_credential(&credential).unwrap_err() {
            CredentialError::MissingCredentials { missing } => {
                assert_eq!(missing, vec!["access_token_secret"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let credential = credential_with(Some(""), Some("cs"), None, Some("ts"));

        match Oauth1Credentials::from_credential(&credential).unwrap_err() {
            CredentialError::MissingCredentials { missing } => {
                assert_eq!(missing, vec!["consumer_key", "oauth1_access_token"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn complete_set_is_extracted() {
        let credential = credential_with(Some("ck"), Some("cs"), Some("tok"), Some("ts"));
        let creds = Oauth1Credentials::from_credential(&credential).unwrap();
        assert_eq!(creds.consumer_key, "ck");
        assert_eq!(creds.token, "tok");
        assert_eq!(creds.token_secret, "ts");
    }
}
