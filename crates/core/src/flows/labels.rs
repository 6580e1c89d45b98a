use crate::domain::message::Channel;

/// Channel-agnostic meaning of a menu reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    CreateProposal,
    ViewStatus,
    Yes,
    No,
    Skip,
    Restart,
    Menu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Menu {
    Main,
    EmailOffer,
    AskEmail,
    Optional,
}

impl Menu {
    /// Numbered replies would collide with free input on optional field prompts.
    fn accepts_numbers(&self) -> bool {
        !matches!(self, Self::Optional)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuOption {
    pub label: String,
    pub intent: Intent,
}

impl MenuOption {
    fn new(label: &str, intent: Intent) -> Self {
        Self { label: label.to_owned(), intent }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuSet {
    pub main: Vec<MenuOption>,
    pub email_offer: Vec<MenuOption>,
    pub ask_email: Vec<MenuOption>,
    pub optional: Vec<MenuOption>,
    pub share_contact: String,
}

impl MenuSet {
    fn options(&self, menu: Menu) -> &[MenuOption] {
        match menu {
            Menu::Main => &self.main,
            Menu::EmailOffer => &self.email_offer,
            Menu::AskEmail => &self.ask_email,
            Menu::Optional => &self.optional,
        }
    }
}

/// Quick-reply labels per channel. Telegram shows keyboard buttons, WhatsApp a numbered list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelLabels {
    pub telegram: MenuSet,
    pub whatsapp: MenuSet,
}

impl Default for ChannelLabels {
    fn default() -> Self {
        use Intent::{CreateProposal, No, Skip, ViewStatus, Yes};

        let telegram = MenuSet {
            main: vec![
                MenuOption::new("📝 Criar proposta", CreateProposal),
                MenuOption::new("📊 Ver status", ViewStatus),
            ],
            email_offer: vec![
                MenuOption::new("✅ Enviar por e-mail", Yes),
                MenuOption::new("❌ Não enviar", No),
                MenuOption::new("📝 Criar outra", CreateProposal),
                MenuOption::new("📊 Ver status", ViewStatus),
            ],
            ask_email: vec![
                MenuOption::new("✅ Sim", Yes),
                MenuOption::new("❌ Não", No),
                MenuOption::new("📝 Criar outra", CreateProposal),
                MenuOption::new("📊 Ver status", ViewStatus),
            ],
            optional: vec![MenuOption::new("⏭️ Pular", Skip)],
            share_contact: "📱 Compartilhar meu número".to_owned(),
        };
        let whatsapp = MenuSet {
            main: vec![
                MenuOption::new("Criar proposta", CreateProposal),
                MenuOption::new("Ver status", ViewStatus),
            ],
            email_offer: vec![
                MenuOption::new("Enviar por e-mail", Yes),
                MenuOption::new("Não enviar", No),
                MenuOption::new("Criar outra", CreateProposal),
                MenuOption::new("Ver status", ViewStatus),
            ],
            ask_email: vec![
                MenuOption::new("Sim", Yes),
                MenuOption::new("Não", No),
                MenuOption::new("Criar outra", CreateProposal),
                MenuOption::new("Ver status", ViewStatus),
            ],
            optional: vec![MenuOption::new("Pular", Skip)],
            share_contact: "Compartilhar meu número".to_owned(),
        };

        Self { telegram, whatsapp }
    }
}

impl ChannelLabels {
    pub fn for_channel(&self, channel: Channel) -> &MenuSet {
        match channel {
            Channel::Telegram => &self.telegram,
            Channel::Whatsapp => &self.whatsapp,
        }
    }

    pub fn labels(&self, channel: Channel, menu: Menu) -> Vec<String> {
        self.for_channel(channel).options(menu).iter().map(|option| option.label.clone()).collect()
    }

    /// Maps a reply onto the intent of `menu`: exact label, 1-based number, then synonyms.
    pub fn resolve(&self, channel: Channel, menu: Menu, text: &str) -> Option<Intent> {
        let options = self.for_channel(channel).options(menu);
        let normalized = normalize_label(text);
        if normalized.is_empty() && text.trim() != "-" {
            return None;
        }

        if let Some(option) = options.iter().find(|option| normalize_label(&option.label) == normalized)
        {
            return Some(option.intent);
        }

        if menu.accepts_numbers() {
            if let Ok(index) = text.trim().trim_end_matches(['.', ')']).parse::<usize>() {
                return index.checked_sub(1).and_then(|index| options.get(index)).map(|o| o.intent);
            }
        }

        let intent = synonym(text.trim(), &normalized)?;
        options.iter().any(|option| option.intent == intent).then_some(intent)
    }
}

/// Commands honoured at every step.
pub fn global_intent(text: &str) -> Option<Intent> {
    match normalize_label(text).as_str() {
        "start" | "reiniciar" | "recomecar" | "recomeçar" => Some(Intent::Restart),
        "menu" | "voltar" => Some(Intent::Menu),
        _ => None,
    }
}

/// Lowercase alphanumerics only, so emoji and punctuation never affect matching.
pub fn normalize_label(raw: &str) -> String {
    raw.chars().filter(|ch| ch.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

fn synonym(raw: &str, normalized: &str) -> Option<Intent> {
    if raw == "-" {
        return Some(Intent::Skip);
    }
    match normalized {
        "sim" | "s" | "yes" | "quero" | "enviar" | "enviarporemail" => Some(Intent::Yes),
        "nao" | "não" | "n" | "no" | "naoenviar" | "nãoenviar" => Some(Intent::No),
        "pular" | "pula" | "skip" | "nenhum" | "nenhuma" => Some(Intent::Skip),
        "criar" | "criarproposta" | "criaroutra" | "novaproposta" | "nova" => {
            Some(Intent::CreateProposal)
        }
        "status" | "verstatus" | "propostas" | "minhaspropostas" => Some(Intent::ViewStatus),
        _ => None,
    }
}
