//! Initiation settings shared by the deposit and withdrawal handlers

use crate::config::MpesaConfig;
use crate::gateway::{CollectionCredentials, DisbursementCredentials};

#[derive(Clone)]
pub struct InitiationSettings {
    pub collection: CollectionCredentials,
    pub disbursement: DisbursementCredentials,
    pub country_code: String,
    pub account_reference_prefix: String,
}

impl InitiationSettings {
    pub fn from_config(config: &MpesaConfig) -> Self {
        let label = config.account_reference_prefix.clone();
        Self {
            collection: CollectionCredentials {
                shortcode: config.shortcode.clone(),
                passkey: config.passkey.clone(),
                callback_url: config.collection_callback_url(),
                label: label.clone(),
            },
            disbursement: DisbursementCredentials {
                initiator_name: config.b2c_initiator_name.clone(),
                security_credential: config.b2c_security_credential.clone(),
                shortcode: config.b2c_shortcode.clone(),
                command_id: config.b2c_command_id.clone(),
                result_url: config.disbursement_result_url(),
                timeout_url: config.disbursement_timeout_url(),
                label: label.clone(),
            },
            country_code: config.phone_country_code.clone(),
            account_reference_prefix: label,
        }
    }
}
