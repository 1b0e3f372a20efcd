use bigdecimal::BigDecimal;
use url::Url;

use super::{amount_param, QrError};
use crate::config::BankConfig;

const VIETQR_BASE: &str = "https://img.vietqr.io/image";
const SEPAY_IMAGE_BASE: &str = "https://qr.sepay.vn/img";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateKind {
    VietQr,
    SepayImage,
}

/// Static QR image URL. No network call is made; the image host renders
/// the QR when the client loads the URL.
#[derive(Debug, Clone)]
pub struct QrTemplate {
    kind: TemplateKind,
    bank_code: String,
    account_name: String,
}

impl QrTemplate {
    pub fn vietqr(bank: &BankConfig) -> Self {
        Self::new(TemplateKind::VietQr, bank)
    }

    pub fn sepay_image(bank: &BankConfig) -> Self {
        Self::new(TemplateKind::SepayImage, bank)
    }

    fn new(kind: TemplateKind, bank: &BankConfig) -> Self {
        QrTemplate {
            kind,
            bank_code: bank.bank_code.clone(),
            account_name: bank.account_name.clone(),
        }
    }

    pub fn render(
        &self,
        bank_account: &str,
        amount: &BigDecimal,
        reference: &str,
    ) -> Result<String, QrError> {
        let amount = amount_param(amount);
        let url = match self.kind {
            TemplateKind::VietQr => Url::parse_with_params(
                &format!(
                    "{}/{}-{}-compact2.jpg",
                    VIETQR_BASE, self.bank_code, bank_account
                ),
                &[
                    ("accountNo", bank_account),
                    ("amount", amount.as_str()),
                    ("addInfo", reference),
                    ("accountName", self.account_name.as_str()),
                ],
            ),
            TemplateKind::SepayImage => Url::parse_with_params(
                SEPAY_IMAGE_BASE,
                &[
                    ("acc", bank_account),
                    ("bank", self.bank_code.as_str()),
                    ("amount", amount.as_str()),
                    ("des", reference),
                ],
            ),
        }
        .map_err(|e| QrError::InvalidConfiguration(format!("cannot build QR url: {}", e)))?;

        Ok(url.into())
    }
}
