//! Command grammar for control messages.
//!
//! Control messages are asterisk-delimited, Spanish keyword prefixes
//! (`*PANEL SUPERIOR* texto`, `*DULCES*id*nombre*descripcion*precios*`, ...).
//! Rules are evaluated in a fixed precedence order and the first rule whose
//! prefix matches owns the message: it either produces a command or rejects
//! the message. Keyword prefixes are compared ASCII case-insensitively;
//! payloads keep their original case.

use std::{str::FromStr, sync::OnceLock};

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::{Message, ProductId};

/// Product fields carried by an upsert. Images are attached by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductDraft {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price_primary: Option<Decimal>,
    pub price_secondary: Option<Decimal>,
}

/// Bot credentials pushed over the wire as a JSON message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteConfig {
    pub token: String,
    pub chat_id: String,
    #[serde(default)]
    pub aux_token: String,
    #[serde(default)]
    pub aux_chat_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    ClearHistory,
    /// Empty text clears the ticker.
    SetTicker(String),
    ShowNotification(String),
    RouletteOffer {
        attempts: u32,
        win_hour: u8,
        code: String,
    },
    SetPaymentCard(String),
    ClearPaymentCard,
    DeleteProduct(ProductId),
    UpsertProduct(ProductDraft),
    RemoteConfig(RemoteConfig),
    PlainMessage {
        text: Option<String>,
        image_url: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ClearHistory => "clear_history",
            Command::SetTicker(_) => "set_ticker",
            Command::ShowNotification(_) => "show_notification",
            Command::RouletteOffer { .. } => "roulette_offer",
            Command::SetPaymentCard(_) => "set_payment_card",
            Command::ClearPaymentCard => "clear_payment_card",
            Command::DeleteProduct(_) => "delete_product",
            Command::UpsertProduct(_) => "upsert_product",
            Command::RemoteConfig(_) => "remote_config",
            Command::PlainMessage { .. } => "plain_message",
        }
    }

    pub fn is_control(&self) -> bool {
        !matches!(self, Command::PlainMessage { .. })
    }
}

/// Why a message that looked like a control command was dropped.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("notification without text")]
    EmptyNotification,
    #[error("roulette expects 3 segments (attempts*hour*code), got {0}")]
    RouletteSegments(usize),
    #[error("roulette attempts is not a number: {0:?}")]
    RouletteAttempts(String),
    #[error("roulette hour out of range 0-23: {0:?}")]
    RouletteHour(String),
    #[error("card number may only contain digits, spaces and dashes")]
    InvalidCard,
    #[error("product delete expects exactly one numeric id")]
    InvalidDelete,
    #[error("product command expects at least 5 segments, got {0}")]
    ProductSegments(usize),
    #[error("product id is not a positive integer: {0:?}")]
    ProductId(String),
    #[error("no CUP/MLC price found in {0:?}")]
    ProductPrice(String),
    #[error("unrecognized control syntax: {0:?}")]
    Unrecognized(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Command(Command),
    Rejected(Rejection),
    /// Nothing to classify (empty text, membership event).
    Ignored,
}

type Rule = fn(&str) -> Option<ParseOutcome>;

/// Grammar rules in precedence order. Changing the order changes behavior.
const GRAMMAR: &[(&str, Rule)] = &[
    ("clear_history", rule_clear_history),
    ("ticker", rule_ticker),
    ("notification", rule_notification),
    ("roulette", rule_roulette),
    ("payment_card", rule_payment_card),
    ("clear_payment_card", rule_clear_payment_card),
    ("delete_product", rule_delete_product),
    ("remote_config", rule_remote_config),
    ("upsert_product", rule_upsert_product),
];

/// Classify a whole message: its text (or caption) through the grammar, with a
/// photo-only message falling back to a plain message.
pub fn classify(msg: &Message) -> ParseOutcome {
    if msg.is_membership_event {
        return ParseOutcome::Ignored;
    }
    match msg.body() {
        Some(body) if !body.trim().is_empty() => parse_command(body),
        _ if msg.photo.is_some() => ParseOutcome::Command(Command::PlainMessage {
            text: None,
            image_url: None,
        }),
        _ => ParseOutcome::Ignored,
    }
}

/// Classify raw text against the grammar.
pub fn parse_command(text: &str) -> ParseOutcome {
    let text = text.trim();
    if text.is_empty() {
        return ParseOutcome::Ignored;
    }

    for (name, rule) in GRAMMAR {
        if let Some(outcome) = rule(text) {
            tracing::debug!(rule = name, "command grammar matched");
            return outcome;
        }
    }

    if text.starts_with('*') {
        return ParseOutcome::Rejected(Rejection::Unrecognized(first_segment(text)));
    }

    ParseOutcome::Command(Command::PlainMessage {
        text: Some(text.to_string()),
        image_url: None,
    })
}

fn rule_clear_history(text: &str) -> Option<ParseOutcome> {
    text.eq_ignore_ascii_case("*ELIMINAR.M*")
        .then_some(ParseOutcome::Command(Command::ClearHistory))
}

fn rule_ticker(text: &str) -> Option<ParseOutcome> {
    let rest = strip_keyword(text, "*PANEL SUPERIOR*")?;
    Some(ParseOutcome::Command(Command::SetTicker(
        rest.trim().to_string(),
    )))
}

fn rule_notification(text: &str) -> Option<ParseOutcome> {
    let rest = strip_keyword(text, "*NOTIFICACION*")?.trim();
    if rest.is_empty() {
        return Some(ParseOutcome::Rejected(Rejection::EmptyNotification));
    }
    Some(ParseOutcome::Command(Command::ShowNotification(
        rest.to_string(),
    )))
}

fn rule_roulette(text: &str) -> Option<ParseOutcome> {
    let rest = strip_keyword(text, "*RULETA*")?;
    let segments = segments(rest);
    let [attempts, hour, code] = segments.as_slice() else {
        return Some(ParseOutcome::Rejected(Rejection::RouletteSegments(
            segments.len(),
        )));
    };

    let Ok(attempts_n) = attempts.parse::<u32>() else {
        return Some(ParseOutcome::Rejected(Rejection::RouletteAttempts(
            attempts.to_string(),
        )));
    };
    let win_hour = match hour.parse::<u8>() {
        Ok(h) if h <= 23 => h,
        _ => {
            return Some(ParseOutcome::Rejected(Rejection::RouletteHour(
                hour.to_string(),
            )))
        }
    };

    Some(ParseOutcome::Command(Command::RouletteOffer {
        attempts: attempts_n,
        win_hour,
        code: code.to_string(),
    }))
}

fn rule_payment_card(text: &str) -> Option<ParseOutcome> {
    let rest = strip_keyword(text, "*TARJETA*")?.trim();
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
        return Some(ParseOutcome::Rejected(Rejection::InvalidCard));
    }
    Some(ParseOutcome::Command(Command::SetPaymentCard(
        rest.to_string(),
    )))
}

fn rule_clear_payment_card(text: &str) -> Option<ParseOutcome> {
    text.eq_ignore_ascii_case("*TARJETA.E*")
        .then_some(ParseOutcome::Command(Command::ClearPaymentCard))
}

fn rule_delete_product(text: &str) -> Option<ParseOutcome> {
    let rest = strip_keyword(text, "*ELIMINAR.PRODUCTO*")?;
    let id = match segments(rest).as_slice() {
        [id] => parse_product_id(id),
        _ => None,
    };
    Some(match id {
        Some(id) => ParseOutcome::Command(Command::DeleteProduct(id)),
        None => ParseOutcome::Rejected(Rejection::InvalidDelete),
    })
}

fn rule_remote_config(text: &str) -> Option<ParseOutcome> {
    if !text.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;

    let token = coerce_string(obj.get("token"))?;
    let chat_id = coerce_string(obj.get("chatId"))?;
    if token.is_empty() || chat_id.is_empty() {
        return None;
    }

    Some(ParseOutcome::Command(Command::RemoteConfig(RemoteConfig {
        token,
        chat_id,
        aux_token: coerce_string(obj.get("auxBotToken")).unwrap_or_default(),
        aux_chat_id: coerce_string(obj.get("auxChatId")).unwrap_or_default(),
    })))
}

fn rule_upsert_product(text: &str) -> Option<ParseOutcome> {
    strip_keyword(text, "*DULCES*")?;

    let segs = segments(text);
    if segs.len() < 5 || !segs[0].eq_ignore_ascii_case("DULCES") {
        return Some(ParseOutcome::Rejected(Rejection::ProductSegments(
            segs.len(),
        )));
    }

    let Some(id) = parse_product_id(segs[1]) else {
        return Some(ParseOutcome::Rejected(Rejection::ProductId(
            segs[1].to_string(),
        )));
    };

    let (price_primary, price_secondary) = parse_prices(segs[4]);
    if price_primary.is_none() && price_secondary.is_none() {
        return Some(ParseOutcome::Rejected(Rejection::ProductPrice(
            segs[4].to_string(),
        )));
    }

    Some(ParseOutcome::Command(Command::UpsertProduct(ProductDraft {
        id,
        name: segs[2].to_string(),
        description: segs[3].to_string(),
        price_primary,
        price_secondary,
    })))
}

/// Scan a price segment for `<amount> CUP` / `<amount> MLC` tokens.
///
/// Amounts accept `,` or `.` as decimal separator; the last token per currency
/// wins.
pub fn parse_prices(segment: &str) -> (Option<Decimal>, Option<Decimal>) {
    static PRICE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PRICE_RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(CUP|MLC)\b").expect("price regex is valid")
    });

    let mut primary = None;
    let mut secondary = None;
    for caps in re.captures_iter(segment) {
        let amount = caps[1].replace(',', ".");
        let Ok(value) = Decimal::from_str(&amount) else {
            continue;
        };
        if caps[2].eq_ignore_ascii_case("CUP") {
            primary = Some(value);
        } else {
            secondary = Some(value);
        }
    }
    (primary, secondary)
}

/// Strip an ASCII keyword prefix, ignoring case.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        text.get(keyword.len()..)
    } else {
        None
    }
}

/// Non-empty, trimmed `*`-delimited segments.
fn segments(text: &str) -> Vec<&str> {
    text.split('*')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn first_segment(text: &str) -> String {
    segments(text).first().copied().unwrap_or_default().to_string()
}

fn parse_product_id(s: &str) -> Option<ProductId> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<ProductId>().ok().filter(|id| *id > 0)
}

fn coerce_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, PhotoVariant};

    fn cmd(text: &str) -> Command {
        match parse_command(text) {
            ParseOutcome::Command(c) => c,
            other => panic!("expected a command for {text:?}, got {other:?}"),
        }
    }

    fn rejected(text: &str) -> Rejection {
        match parse_command(text) {
            ParseOutcome::Rejected(r) => r,
            other => panic!("expected a rejection for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_product_with_both_currencies() {
        let c = cmd("*DULCES*42*Caramelo*Rico*10,50 CUP 2 MLC*");
        assert_eq!(
            c,
            Command::UpsertProduct(ProductDraft {
                id: 42,
                name: "Caramelo".into(),
                description: "Rico".into(),
                price_primary: Some(Decimal::new(1050, 2)),
                price_secondary: Some(Decimal::new(2, 0)),
            })
        );
    }

    #[test]
    fn product_price_last_match_wins_and_currency_is_case_insensitive() {
        let (cup, mlc) = parse_prices("5 cup 7.25 Cup");
        assert_eq!(cup, Some(Decimal::new(725, 2)));
        assert_eq!(mlc, None);
    }

    #[test]
    fn product_without_price_or_with_bad_id_is_rejected() {
        assert!(matches!(
            rejected("*DULCES*1*Pan*Suave*gratis*"),
            Rejection::ProductPrice(_)
        ));
        assert!(matches!(
            rejected("*DULCES*x1*Pan*Suave*10 CUP*"),
            Rejection::ProductId(_)
        ));
        assert!(matches!(
            rejected("*DULCES*1*Pan*"),
            Rejection::ProductSegments(3)
        ));
    }

    #[test]
    fn parses_roulette_and_rejects_bad_hour() {
        assert_eq!(
            cmd("*RULETA*3*14*WIN123*"),
            Command::RouletteOffer {
                attempts: 3,
                win_hour: 14,
                code: "WIN123".into()
            }
        );
        assert!(matches!(
            rejected("*RULETA*3*25*WIN123*"),
            Rejection::RouletteHour(_)
        ));
        assert_eq!(rejected("*RULETA*3*14*"), Rejection::RouletteSegments(2));
    }

    #[test]
    fn ticker_and_notification() {
        assert_eq!(
            cmd("*PANEL SUPERIOR*  Ofertas de hoy  "),
            Command::SetTicker("Ofertas de hoy".into())
        );
        assert_eq!(cmd("*panel superior*"), Command::SetTicker(String::new()));
        assert_eq!(
            cmd("*NOTIFICACION* Cerrado el lunes"),
            Command::ShowNotification("Cerrado el lunes".into())
        );
        assert_eq!(rejected("*NOTIFICACION*   "), Rejection::EmptyNotification);
    }

    #[test]
    fn payment_card_forms() {
        assert_eq!(
            cmd("*TARJETA* 9204-1234 5678"),
            Command::SetPaymentCard("9204-1234 5678".into())
        );
        assert_eq!(rejected("*TARJETA* abc"), Rejection::InvalidCard);
        assert_eq!(cmd("*TARJETA.E*"), Command::ClearPaymentCard);
    }

    #[test]
    fn clear_history_is_exact_and_delete_takes_one_id() {
        assert_eq!(cmd("*ELIMINAR.M*"), Command::ClearHistory);
        assert_eq!(cmd("*ELIMINAR.PRODUCTO*7*"), Command::DeleteProduct(7));
        assert_eq!(rejected("*ELIMINAR.PRODUCTO*7*8*"), Rejection::InvalidDelete);
        assert_eq!(rejected("*ELIMINAR.PRODUCTO*siete*"), Rejection::InvalidDelete);
        assert!(matches!(
            rejected("*ELIMINAR.MX*"),
            Rejection::Unrecognized(_)
        ));
    }

    #[test]
    fn remote_config_from_json() {
        let c = cmd(r#"{"token":"123:abc","chatId":-100200,"auxBotToken":"456:def"}"#);
        assert_eq!(
            c,
            Command::RemoteConfig(RemoteConfig {
                token: "123:abc".into(),
                chat_id: "-100200".into(),
                aux_token: "456:def".into(),
                aux_chat_id: String::new(),
            })
        );

        // Missing chat id is not a config message; it's ordinary text.
        assert!(matches!(
            cmd(r#"{"token":"123:abc"}"#),
            Command::PlainMessage { .. }
        ));
    }

    #[test]
    fn unknown_asterisk_syntax_is_dropped_not_chat() {
        assert_eq!(
            rejected("*PROMO* 2x1"),
            Rejection::Unrecognized("PROMO".into())
        );
        assert_eq!(
            cmd("hola, ¿tienen turrones?"),
            Command::PlainMessage {
                text: Some("hola, ¿tienen turrones?".into()),
                image_url: None
            }
        );
    }

    #[test]
    fn classify_uses_caption_and_photo_only_messages() {
        let mut msg = Message {
            sender_name: "Ana".into(),
            chat_id: ChatId(1),
            timestamp: 1,
            text: None,
            caption: Some("*DULCES*3*Torta*Chocolate*300 CUP*".into()),
            photo: Some(vec![PhotoVariant {
                file_id: "f".into(),
                width: 10,
                height: 10,
            }]),
            is_membership_event: false,
        };
        assert!(matches!(
            classify(&msg),
            ParseOutcome::Command(Command::UpsertProduct(_))
        ));

        msg.caption = None;
        assert_eq!(
            classify(&msg),
            ParseOutcome::Command(Command::PlainMessage {
                text: None,
                image_url: None
            })
        );

        msg.is_membership_event = true;
        assert_eq!(classify(&msg), ParseOutcome::Ignored);
    }
}
