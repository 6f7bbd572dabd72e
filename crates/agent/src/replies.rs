//! Reply rendering: one friendly French sentence per outcome, naming the
//! error kind's remedy when something went wrong.

use majordome_core::errors::ErrorKind;
use majordome_core::ServiceCandidate;

pub fn display_name(service: &str) -> &str {
    match service {
        "hubspot" => "HubSpot",
        "slack" => "Slack",
        "trello" => "Trello",
        "gmail" => "Gmail",
        "drive" => "Google Drive",
        "quickbooks" => "QuickBooks",
        other => other,
    }
}

pub fn general_reply() -> String {
    "Je peux agir sur vos services connectés (CRM, tableaux de tâches, emails, \
     messagerie, fichiers, comptabilité). Dites-moi ce que vous voulez faire."
        .to_string()
}

pub fn duplicate_reply() -> String {
    "Vous venez de m'envoyer le même message ; je n'ai rien fait de plus. \
     Reformulez si vous attendiez autre chose."
        .to_string()
}

pub fn cancel_reply() -> String {
    "D'accord, j'annule. Que puis-je faire d'autre ?".to_string()
}

pub fn choose_service_reply(candidates: &[ServiceCandidate]) -> String {
    let names: Vec<&str> =
        candidates.iter().map(|candidate| display_name(&candidate.service)).collect();
    match names.as_slice() {
        [] => "Je ne sais pas quel service utiliser : pouvez-vous préciser ?".to_string(),
        [first, second] => {
            format!("Je peux le faire avec {first} ou {second} : lequel dois-je utiliser ?")
        }
        many => format!(
            "Plusieurs services correspondent ({}) : lequel dois-je utiliser ?",
            many.join(", ")
        ),
    }
}

pub fn confirmation_prompt(action_label: &str) -> String {
    format!("Dois-je vraiment {action_label} ? (oui/non)")
}

pub fn slot_validation_reply(detail: &str, prompt: &str) -> String {
    format!("{detail} {prompt}")
}

pub fn not_connected_reply(service: &str) -> String {
    format!(
        "Vous n'avez pas encore connecté {} : activez l'intégration depuis vos paramètres.",
        display_name(service)
    )
}

pub fn unknown_action_reply(service: &str) -> String {
    format!(
        "Que souhaitez-vous faire avec {} ? Précisez l'action, par exemple « crée », « envoie » ou « partage ».",
        display_name(service)
    )
}

/// §7 rendering: the kind decides the remedy, the adapter supplies detail.
pub fn error_reply(kind: ErrorKind, service: &str, detail: &str) -> String {
    let service_name = display_name(service);
    match kind {
        ErrorKind::Transport => format!(
            "{service_name} ne répond pas pour le moment, réessayez dans quelques instants."
        ),
        ErrorKind::Reauthorize => format!(
            "Votre connexion à {service_name} a expiré : reconfigurez cette intégration depuis vos paramètres."
        ),
        ErrorKind::Permission | ErrorKind::NotFound | ErrorKind::Validation => detail.to_string(),
        ErrorKind::Schema => format!("Il manque des informations pour {service_name} : {detail}"),
        ErrorKind::Ambiguity => detail.to_string(),
        ErrorKind::Internal => {
            "Désolé, une erreur interne s'est produite. Réessayez dans un instant.".to_string()
        }
    }
}
