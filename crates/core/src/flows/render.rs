use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::draft::DraftField;
use crate::domain::proposal::ProposalSummary;
use crate::flows::states::Step;

pub const NOT_UNDERSTOOD: &str = "Não entendi. Envie /start para recomeçar ou use o menu.";
pub const ONBOARDING: &str = "Olá! Para começar, compartilhe seu número de telefone para \
    confirmarmos seu cadastro.";
pub const UNKNOWN_OPERATOR: &str = "Não encontramos uma conta com este número. Cadastre seu \
    telefone no aplicativo e envie /start para tentar novamente.";
pub const IDENTITY_UNAVAILABLE: &str = "Não foi possível verificar seu cadastro agora. Tente \
    novamente em alguns minutos enviando /start.";
pub const DESCRIBE_PROJECT: &str = "Descreva o projeto em uma mensagem (texto ou áudio): \
    cliente, serviço, valor e prazo de entrega.";
pub const EXTRACTION_FAILED: &str = "Não consegui interpretar a descrição. Envie novamente com \
    mais detalhes: cliente, serviço, valor e prazo.";
pub const EXTRACTION_FALLBACK: &str = "Ainda não consegui entender a descrição. Vamos \
    continuar pergunta por pergunta, mantendo o que já foi informado.";
pub const VOICE_UNAVAILABLE: &str = "Não consegui transcrever o áudio. Por favor, digite a \
    mensagem.";
pub const COMMIT_FAILED: &str = "Não foi possível salvar a proposta agora. Envie qualquer \
    mensagem para tentar novamente.";
pub const ASK_CLIENT_EMAIL: &str = "Deseja enviar a proposta por e-mail ao cliente?";
pub const GET_CLIENT_EMAIL: &str = "Qual é o e-mail do cliente?";
pub const INVALID_EMAIL: &str = "E-mail inválido. Envie um endereço como nome@empresa.com.";
pub const EMAIL_SKIPPED: &str = "Tudo certo, a proposta ficou salva como rascunho.";
pub const EMAIL_FAILED: &str = "Não foi possível enviar o e-mail. Tente reenviar pelo \
    aplicativo web.";
pub const STATUS_FAILED: &str = "Não foi possível carregar suas propostas agora. Tente \
    novamente em instantes.";
pub const NO_PROPOSALS: &str = "Você ainda não tem propostas.";
pub const MAIN_MENU: &str = "O que deseja fazer?";
pub const INVALID_VALUE: &str = "Valor inválido. Envie apenas o valor, por exemplo 1.500,00.";
pub const INVALID_DATE: &str = "Data inválida. Use o formato DD/MM/AAAA, por exemplo 20/07/2025.";
pub const INVALID_PHONE: &str = "Telefone inválido. Envie o número com DDD ou toque em pular.";
pub const EMPTY_ANSWER: &str = "Preciso de uma resposta em texto para continuar.";

/// Formats an amount as Brazilian reais: `R$ 1.500,00`.
pub fn format_brl(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let mut absolute = rounded.abs();
    absolute.rescale(2);
    let fixed = absolute.to_string();
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}R$ {grouped},{cents}")
}

pub fn greeting(display_name: Option<&str>) -> String {
    match display_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("Olá, {name}! Você está conectado. O que deseja fazer?"),
        None => "Olá! Você está conectado. O que deseja fazer?".to_owned(),
    }
}

pub fn missing_fields(fields: &[DraftField]) -> String {
    let labels: Vec<&str> = fields.iter().map(DraftField::label).collect();
    format!("Quase lá! Ainda faltam: {}. Envie essas informações.", labels.join(", "))
}

pub fn committed(title: &str, value: Option<Decimal>) -> String {
    match value {
        Some(value) => format!("✅ Proposta *{title}* criada no valor de {}.", format_brl(value)),
        None => format!("✅ Proposta *{title}* criada."),
    }
}

pub fn offer_email(recipient: &str) -> String {
    format!("Deseja enviar a proposta para {recipient}?")
}

pub fn email_sent(recipient: &str, public_url: &str) -> String {
    if public_url.trim().is_empty() {
        format!("📧 Proposta enviada para {recipient}.")
    } else {
        format!("📧 Proposta enviada para {recipient}. Link: {public_url}")
    }
}

/// One line per proposal: title, client, value and status label.
pub fn status_listing(proposals: &[ProposalSummary]) -> String {
    if proposals.is_empty() {
        return NO_PROPOSALS.to_owned();
    }

    let lines: Vec<String> = proposals
        .iter()
        .map(|proposal| {
            format!(
                "• {} | {} | {} | {}",
                proposal.title,
                proposal.client_name.as_deref().unwrap_or("Sem cliente"),
                format_brl(proposal.value),
                proposal.status.label()
            )
        })
        .collect();
    format!("📊 Suas propostas recentes:\n{}", lines.join("\n"))
}

/// Question asked when a structured step becomes current.
pub fn collect_prompt(step: Step) -> &'static str {
    match step {
        Step::CollectClientName => "Qual é o nome do cliente?",
        Step::CollectClientEmail => "Qual é o e-mail do cliente? (opcional)",
        Step::CollectClientPhone => "Qual é o telefone do cliente? (opcional)",
        Step::CollectTitle => "Qual é o título da proposta?",
        Step::CollectServiceDescription => "Descreva o serviço em poucas palavras.",
        Step::CollectDetailedDescription => "Quer adicionar uma descrição detalhada? (opcional)",
        Step::CollectValue => "Qual é o valor da proposta? (ex.: 1.500,00)",
        Step::CollectDeliveryTime => "Qual é o prazo de entrega? (ex.: 15 dias)",
        Step::CollectValidityDate => "Até quando a proposta é válida? (DD/MM/AAAA)",
        Step::CollectObservations => "Alguma observação? (opcional)",
        _ => MAIN_MENU,
    }
}
