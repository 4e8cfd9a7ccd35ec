//! 进程内计数器
//!
//! 以 Prometheus 文本格式输出；派生次数同时作为"认证失败时未触碰密钥"的检测钩子。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SignerErrorKind;

#[derive(Debug, Default)]
pub struct SignerMetrics {
    requests_total: AtomicU64,
    derivations_total: AtomicU64,
    signed_total: AtomicU64,
    inputs_signed_total: AtomicU64,
    input_failures_total: AtomicU64,
    rejected_authentication: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_path: AtomicU64,
    rejected_derivation: AtomicU64,
    rejected_finalization: AtomicU64,
    rejected_internal: AtomicU64,
}

impl SignerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_derivation(&self) {
        self.derivations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_signed(&self, inputs_signed: usize, input_failures: usize) {
        self.signed_total.fetch_add(1, Ordering::Relaxed);
        self.inputs_signed_total
            .fetch_add(inputs_signed as u64, Ordering::Relaxed);
        self.input_failures_total
            .fetch_add(input_failures as u64, Ordering::Relaxed);
    }

    pub fn count_rejected(&self, kind: SignerErrorKind) {
        self.rejected_counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    fn rejected_counter(&self, kind: SignerErrorKind) -> &AtomicU64 {
        match kind {
            SignerErrorKind::Authentication => &self.rejected_authentication,
            SignerErrorKind::MalformedRequest => &self.rejected_malformed,
            SignerErrorKind::InvalidDerivationPath => &self.rejected_path,
            SignerErrorKind::KeyDerivation => &self.rejected_derivation,
            SignerErrorKind::Finalization => &self.rejected_finalization,
            SignerErrorKind::Internal => &self.rejected_internal,
        }
    }

    pub fn derivations(&self) -> u64 {
        self.derivations_total.load(Ordering::Relaxed)
    }

    pub fn signed(&self) -> u64 {
        self.signed_total.load(Ordering::Relaxed)
    }

    pub fn rejected(&self, kind: SignerErrorKind) -> u64 {
        self.rejected_counter(kind).load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let counter = |out: &mut String, name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        };

        counter(
            &mut out,
            "escrow_signer_requests_total",
            "Signing requests received",
            self.requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "escrow_signer_derivations_total",
            "Child key derivations performed",
            self.derivations(),
        );
        counter(
            &mut out,
            "escrow_signer_signed_total",
            "Transactions signed and finalized",
            self.signed(),
        );
        counter(
            &mut out,
            "escrow_signer_inputs_signed_total",
            "Transaction inputs signed",
            self.inputs_signed_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "escrow_signer_input_failures_total",
            "Transaction inputs that failed to sign",
            self.input_failures_total.load(Ordering::Relaxed),
        );

        out.push_str("# HELP escrow_signer_rejected_total Rejected requests by reason\n");
        out.push_str("# TYPE escrow_signer_rejected_total counter\n");
        for kind in [
            SignerErrorKind::Authentication,
            SignerErrorKind::MalformedRequest,
            SignerErrorKind::InvalidDerivationPath,
            SignerErrorKind::KeyDerivation,
            SignerErrorKind::Finalization,
            SignerErrorKind::Internal,
        ] {
            out.push_str(&format!(
                "escrow_signer_rejected_total{{reason=\"{}\"}} {}\n",
                kind.as_str(),
                self.rejected(kind)
            ));
        }

        out
    }
}
