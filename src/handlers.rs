/// Command handlers module
///
/// This module handles:
/// - Building the replies for each bot command
/// - Lifting the cooldown on request
/// - Running the credential handshake and storing its result

use anyhow::Result;
use chrono::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::app::App;
use crate::cooldown::CooldownState;
use crate::tgtg::registration::{
    CredentialHandshake, HandshakeState, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
};

const START_MESSAGE: &str = "👋 Bonjour ! Je surveille vos favoris Too Good To Go.\n\n\
    Je vous envoie un message dès qu'un panier est disponible dans un de vos magasins favoris, \
    au plus une fois par jour et par magasin.\n\n\
    Tapez /help pour la liste des commandes.";

const HELP_MESSAGE: &str = "ℹ️ Commandes\n\n\
    /start - Message de bienvenue\n\
    /help - Afficher cette aide\n\
    /status - État de la surveillance\n\
    /resume - Reprendre la surveillance après une pause anti-bot\n\
    /register - Obtenir de nouveaux identifiants par e-mail\n\
    /settings - Afficher les réglages\n\
    /notifications_start - Activer les notifications\n\
    /notifications_stop - Désactiver les notifications\n\
    /about - À propos";

const ABOUT_MESSAGE: &str = "TooGoodToNotify\n\n\
    Vérifie vos favoris à intervalles aléatoires entre 10h et 19h (UTC), \
    sauf le dimanche, et se met en pause automatiquement si l'accès est bloqué.";

/// Text for /status
pub async fn status_text(app: &App) -> String {
    let mut text = match app.cooldown.is_suspended().await {
        CooldownState::Inactive => "✅ Surveillance active".to_string(),
        CooldownState::Suspended { until, remaining } => format!(
            "⏸ Surveillance en pause jusqu'à {} UTC ({} min restantes)",
            until.format("%H:%M"),
            (remaining.num_seconds() + 59) / 60
        ),
    };

    let now = app.clock.now_utc();
    let next = match app.registry.list_armed().await {
        Ok(runs) => runs
            .into_iter()
            .filter_map(|r| r.fire_at)
            .filter(|t| *t > now)
            .min(),
        Err(e) => {
            log::error!("Failed to list armed timers: {}", e);
            None
        }
    };

    match next {
        Some(fire_at) => text.push_str(&format!(
            "\nProchaine vérification : {} UTC",
            fire_at.format("%d/%m %H:%M")
        )),
        None => text.push_str("\nAucune vérification programmée"),
    }
    text
}

/// Clear the cooldown, returning the reply text
pub async fn resume_monitoring(app: &App) -> Result<String> {
    let was_suspended = app.cooldown.is_suspended().await.is_suspended();
    app.cooldown.clear().await?;
    log::info!("Cooldown cleared from chat command");

    Ok(if was_suspended {
        "▶️ Surveillance reprise.".to_string()
    } else {
        "La surveillance n'était pas en pause.".to_string()
    })
}

/// Text for /settings
pub async fn settings_text(app: &App) -> String {
    let notifications = if app.preference.is_enabled().await {
        "activées"
    } else {
        "désactivées"
    };
    let pause = match app.cooldown.is_suspended().await {
        CooldownState::Inactive => "aucune".to_string(),
        CooldownState::Suspended { until, .. } => format!("jusqu'à {} UTC", until.format("%H:%M")),
    };
    let email = app.user_email.as_deref().unwrap_or("non configuré");

    format!(
        "⚙️ Réglages\n\nNotifications : {}\nPause anti-bot : {}\nE-mail : {}\nLangue : français",
        notifications, pause, email
    )
}

/// Switch notifications on or off, returning the reply text
pub async fn set_notifications(app: &App, enabled: bool) -> Result<String> {
    app.preference.set_enabled(enabled).await?;
    Ok(if enabled {
        "🔔 Notifications activées.".to_string()
    } else {
        "🔕 Notifications désactivées. /notifications_start pour les réactiver.".to_string()
    })
}

/// Run the e-mail handshake to completion and store the credentials
pub async fn register_account(
    app: &App,
    poll_every: std::time::Duration,
    timeout: Duration,
) -> Result<String> {
    let email = match app.user_email.as_deref() {
        Some(email) => email,
        None => return Ok("❌ USER_EMAIL n'est pas configuré.".to_string()),
    };

    let handshake =
        CredentialHandshake::start(app.login.clone(), app.clock.clone(), email, timeout).await;

    let reply = match handshake.wait(poll_every).await {
        HandshakeState::Ready(credentials) => {
            app.store.set(credentials.to_config_values()).await?;
            log::info!("Stored new credentials for {}", email);
            "✅ Identifiants enregistrés.".to_string()
        }
        HandshakeState::TimedOut => {
            "⌛ Le lien de connexion n'a pas été validé à temps. Réessayez /register.".to_string()
        }
        HandshakeState::Failed(reason) => format!("❌ Échec de l'enregistrement : {}", reason),
        HandshakeState::Pending => "⌛ Enregistrement toujours en attente.".to_string(),
    };
    Ok(reply)
}

/// Handle the /start command
pub async fn handle_start_command(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, START_MESSAGE).await?;
    Ok(())
}

/// Handle the /help command
pub async fn handle_help_command(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, HELP_MESSAGE).await?;
    Ok(())
}

pub async fn handle_about_command(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, ABOUT_MESSAGE).await?;
    Ok(())
}

pub async fn handle_status_command(bot: Bot, msg: Message, app: &App) -> Result<()> {
    let text = status_text(app).await;
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_resume_command(bot: Bot, msg: Message, app: &App) -> Result<()> {
    let text = match resume_monitoring(app).await {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to clear cooldown: {}", e);
            "❌ Impossible de reprendre la surveillance, réessayez.".to_string()
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_settings_command(bot: Bot, msg: Message, app: &App) -> Result<()> {
    let text = settings_text(app).await;
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle /notifications_start and /notifications_stop
pub async fn handle_notifications_command(
    bot: Bot,
    msg: Message,
    app: &App,
    enabled: bool,
) -> Result<()> {
    let text = match set_notifications(app, enabled).await {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to store notification preference: {}", e);
            "❌ Impossible d'enregistrer le réglage, réessayez.".to_string()
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle the /register command; replies once the handshake settles
pub async fn handle_register_command(bot: Bot, msg: Message, app: &App) -> Result<()> {
    let email = app.user_email.clone().unwrap_or_default();
    if !email.is_empty() {
        bot.send_message(
            msg.chat.id,
            format!(
                "📧 Un lien de connexion a été envoyé à <b>{}</b>. Cliquez dessus dans les 2 minutes.",
                teloxide::utils::html::escape(&email)
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
    }

    let text = match register_account(
        app,
        std::time::Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        Duration::seconds(DEFAULT_TIMEOUT_SECS),
    )
    .await
    {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to store new credentials: {}", e);
            "❌ Identifiants reçus mais non enregistrés.".to_string()
        }
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
