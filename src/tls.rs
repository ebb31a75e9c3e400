use std::sync::OnceLock;

/// Select the `ring` rustls provider for the process, once.
///
/// rustls 0.23 panics on the first TLS config build when more than one provider feature is
/// enabled in the dependency graph and none was installed explicitly. Called before every
/// transport open; a provider installed elsewhere in the process is left in place.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installing_twice_is_harmless() {
        install_rustls_crypto_provider();
        install_rustls_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }
}
