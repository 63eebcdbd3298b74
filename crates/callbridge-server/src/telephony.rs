//! Gateway call control: markup documents and the REST client that applies
//! them to live calls.
//!
//! Every document starts with a spoken sentence. A caller is never
//! transferred, recorded or hung up on in silence.

use std::time::Duration;

use async_trait::async_trait;
use callbridge_types::Language;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("telephony credentials are not configured")]
    NotConfigured,

    #[error("call control request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway rejected call update with status {0}")]
    Rejected(u16),
}

/// Commands the call state machine issues on the telephony leg.
#[async_trait]
pub trait TelephonyControl: Send + Sync {
    /// Redirects the live call to the human-staffed number.
    async fn redirect_to_human(&self, call_sid: &str, language: Language)
        -> Result<(), TelephonyError>;

    /// Prompts for and records a voicemail.
    async fn record_voicemail(&self, call_sid: &str, language: Language)
        -> Result<(), TelephonyError>;

    /// Apologises and hangs up.
    async fn hangup_with_apology(&self, call_sid: &str, language: Language)
        -> Result<(), TelephonyError>;
}

/// Escapes the five XML special characters.
pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn say(language: Language, text: &str) -> String {
    let locale = match language {
        Language::English => "en-US",
        Language::Spanish => "es-MX",
    };
    format!(
        r#"<Say language="{}">{}</Say>"#,
        locale,
        xml_escape(text)
    )
}

fn document(body: &str) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><Response>{body}</Response>"#)
}

struct Phrases {
    greeting: &'static str,
    transfer: &'static str,
    voicemail: &'static str,
    apology: &'static str,
    goodbye: &'static str,
}

fn phrases(language: Language) -> Phrases {
    match language {
        Language::English => Phrases {
            greeting: "Thanks for calling. One moment while I connect you to our assistant.",
            transfer: "Please hold while I connect you with a member of our team.",
            voicemail: "Please leave a message after the tone. Press the pound key when you are finished.",
            apology: "We're sorry, we're having technical difficulties. Please call back shortly. Goodbye.",
            goodbye: "Thank you, your message has been saved. Goodbye.",
        },
        Language::Spanish => Phrases {
            greeting: "Gracias por llamar. Un momento mientras lo conecto con nuestro asistente.",
            transfer: "Por favor espere mientras lo comunico con un miembro de nuestro equipo.",
            voicemail: "Por favor deje su mensaje después del tono. Presione la tecla de número cuando termine.",
            apology: "Lo sentimos, tenemos dificultades técnicas. Por favor llame más tarde. Adiós.",
            goodbye: "Gracias, su mensaje ha sido guardado. Adiós.",
        },
    }
}

/// Answers an inbound call: greet, then open a media stream to
/// `stream_url` carrying `parameters` as custom stream parameters.
pub fn connect_stream_markup(
    language: Language,
    stream_url: &str,
    parameters: &[(&str, &str)],
) -> String {
    let params: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                xml_escape(name),
                xml_escape(value)
            )
        })
        .collect();
    document(&format!(
        r#"{}<Connect><Stream url="{}">{}</Stream></Connect>"#,
        say(language, phrases(language).greeting),
        xml_escape(stream_url),
        params
    ))
}

pub fn transfer_markup(language: Language, number: &str) -> String {
    document(&format!(
        "{}<Dial>{}</Dial>",
        say(language, phrases(language).transfer),
        xml_escape(number)
    ))
}

pub fn voicemail_markup(language: Language, action_url: &str, max_secs: u32) -> String {
    document(&format!(
        r##"{}<Record action="{}" method="POST" maxLength="{}" finishOnKey="#" playBeep="true"/>"##,
        say(language, phrases(language).voicemail),
        xml_escape(action_url),
        max_secs
    ))
}

pub fn apology_markup(language: Language) -> String {
    document(&format!("{}<Hangup/>", say(language, phrases(language).apology)))
}

/// Reply to the recording callback.
pub fn goodbye_markup(language: Language) -> String {
    document(&format!("{}<Hangup/>", say(language, phrases(language).goodbye)))
}

/// Updates live calls through the gateway's REST API by posting a new
/// markup document for the call.
pub struct RestCallControl {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    transfer_number: String,
    recording_callback: String,
    voicemail_max_secs: u32,
}

impl RestCallControl {
    pub fn from_config(config: &Config) -> Result<Self, TelephonyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.telephony.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_base: config.telephony.api_base.trim_end_matches('/').to_string(),
            account_sid: config.telephony.account_sid.clone(),
            auth_token: config.telephony.auth_token.clone(),
            transfer_number: config.telephony.human_transfer_number.clone(),
            recording_callback: config.callback_url("/voice/recording"),
            voicemail_max_secs: config.telephony.voicemail_max_secs,
        })
    }

    async fn update_call(&self, call_sid: &str, markup: String) -> Result<(), TelephonyError> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            return Err(TelephonyError::NotConfigured);
        }
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        );
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", markup)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TelephonyError::Rejected(response.status().as_u16()));
        }
        tracing::debug!(call_sid, "call updated");
        Ok(())
    }
}

#[async_trait]
impl TelephonyControl for RestCallControl {
    async fn redirect_to_human(
        &self,
        call_sid: &str,
        language: Language,
    ) -> Result<(), TelephonyError> {
        if self.transfer_number.is_empty() {
            tracing::warn!(call_sid, "no transfer number configured, taking a voicemail instead");
            return self.record_voicemail(call_sid, language).await;
        }
        self.update_call(call_sid, transfer_markup(language, &self.transfer_number))
            .await
    }

    async fn record_voicemail(
        &self,
        call_sid: &str,
        language: Language,
    ) -> Result<(), TelephonyError> {
        self.update_call(
            call_sid,
            voicemail_markup(language, &self.recording_callback, self.voicemail_max_secs),
        )
        .await
    }

    async fn hangup_with_apology(
        &self,
        call_sid: &str,
        language: Language,
    ) -> Result<(), TelephonyError> {
        self.update_call(call_sid, apology_markup(language)).await
    }
}
