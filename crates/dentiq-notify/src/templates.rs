//! Message templates with `{{variable}}` substitution.
//!
//! Stock wording ships per (kind, channel); operators can override any slot
//! through `with_template` without a template-editing UI. Rendering fills
//! variables from the appointment snapshot — anything beyond substitution
//! is out of scope.

use std::collections::HashMap;

use dentiq_core::error::{DentiqError, Result};
use dentiq_core::types::{Appointment, ChannelKind, MessagePayload, NotificationKind};

/// One template slot: optional subject (email only) plus body.
#[derive(Debug, Clone)]
pub struct Template {
    pub subject: Option<String>,
    pub body: String,
}

/// Variables available to every template.
pub fn variables(appointment: &Appointment) -> Vec<(&'static str, String)> {
    vec![
        ("patient_name", appointment.patient.name.clone()),
        ("professional", appointment.professional.clone()),
        ("treatment", appointment.treatment.clone()),
        ("date", appointment.start_time.format("%d/%m/%Y").to_string()),
        ("time", appointment.start_time.format("%H:%M").to_string()),
        ("appointment_id", appointment.id.clone()),
    ]
}

fn substitute(text: &str, vars: &[(&'static str, String)]) -> String {
    let mut out = text.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Per (kind, channel) template lookup.
pub struct TemplateCatalog {
    overrides: HashMap<(NotificationKind, ChannelKind), Template>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self { overrides: HashMap::new() }
    }

    /// Replace the stock wording for one slot.
    pub fn with_template(
        mut self,
        kind: NotificationKind,
        channel: ChannelKind,
        template: Template,
    ) -> Self {
        self.overrides.insert((kind, channel), template);
        self
    }

    /// Render the template for `kind` on `channel`, substituting variables
    /// from the appointment. `Custom` has no stock template and must go
    /// through `render_custom`.
    pub fn render(
        &self,
        kind: NotificationKind,
        channel: ChannelKind,
        appointment: &Appointment,
    ) -> Result<MessagePayload> {
        let vars = variables(appointment);
        let template = match self.overrides.get(&(kind, channel)) {
            Some(t) => t.clone(),
            None => stock_template(kind, channel).ok_or_else(|| {
                DentiqError::Template(format!("no template for {kind} on {channel}"))
            })?,
        };
        Ok(MessagePayload {
            subject: template.subject.map(|s| substitute(&s, &vars)),
            body: substitute(&template.body, &vars),
        })
    }

    /// Wrap an operator-supplied message for the given channel.
    pub fn render_custom(&self, channel: ChannelKind, message: &str) -> MessagePayload {
        match channel {
            ChannelKind::Email => {
                MessagePayload::with_subject("Mensaje de su clínica dental", message)
            }
            ChannelKind::WhatsApp => MessagePayload::body(message),
        }
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn stock_template(kind: NotificationKind, channel: ChannelKind) -> Option<Template> {
    let template = match (kind, channel) {
        (NotificationKind::Confirmation, ChannelKind::WhatsApp) => Template {
            subject: None,
            body: "Hola {{patient_name}}, su cita de {{treatment}} con {{professional}} \
                   está confirmada para el {{date}} a las {{time}}."
                .into(),
        },
        (NotificationKind::Confirmation, ChannelKind::Email) => Template {
            subject: Some("Cita confirmada — {{date}}".into()),
            body: "Hola {{patient_name}},\n\nSu cita de {{treatment}} con {{professional}} \
                   está confirmada para el {{date}} a las {{time}}.\n\nSu clínica dental."
                .into(),
        },
        (NotificationKind::Reminder, ChannelKind::WhatsApp) => Template {
            subject: None,
            body: "Hola {{patient_name}}, le recordamos su cita de {{treatment}} con \
                   {{professional}} mañana {{date}} a las {{time}}. Si no puede asistir, \
                   por favor avísenos."
                .into(),
        },
        (NotificationKind::Reminder, ChannelKind::Email) => Template {
            subject: Some("Recordatorio de cita — {{date}}".into()),
            body: "Hola {{patient_name}},\n\nLe recordamos su cita de {{treatment}} con \
                   {{professional}} el {{date}} a las {{time}}.\n\nSu clínica dental."
                .into(),
        },
        (NotificationKind::Cancellation, ChannelKind::WhatsApp) => Template {
            subject: None,
            body: "Hola {{patient_name}}, su cita del {{date}} a las {{time}} ha sido \
                   cancelada. Contacte con la clínica para reprogramarla."
                .into(),
        },
        (NotificationKind::Cancellation, ChannelKind::Email) => Template {
            subject: Some("Cita cancelada — {{date}}".into()),
            body: "Hola {{patient_name}},\n\nSu cita de {{treatment}} del {{date}} a las \
                   {{time}} ha sido cancelada. Contacte con la clínica para reprogramarla.\n\n\
                   Su clínica dental."
                .into(),
        },
        (NotificationKind::Rescheduled, ChannelKind::WhatsApp) => Template {
            subject: None,
            body: "Hola {{patient_name}}, su cita de {{treatment}} ha sido reprogramada: \
                   ahora es el {{date}} a las {{time}} con {{professional}}."
                .into(),
        },
        (NotificationKind::Rescheduled, ChannelKind::Email) => Template {
            subject: Some("Cita reprogramada — {{date}}".into()),
            body: "Hola {{patient_name}},\n\nSu cita de {{treatment}} ha sido reprogramada: \
                   ahora es el {{date}} a las {{time}} con {{professional}}.\n\nSu clínica \
                   dental."
                .into(),
        },
        (NotificationKind::Custom, _) => return None,
    };
    Some(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dentiq_core::types::{AppointmentStatus, Patient};

    fn make_appointment() -> Appointment {
        Appointment {
            id: "apt-7".into(),
            patient: Patient {
                id: "pat-7".into(),
                name: "Marta Ríos".into(),
                phone: Some("+34600111222".into()),
                email: Some("marta@example.com".into()),
            },
            professional: "Dra. Ferrer".into(),
            treatment: "Ortodoncia".into(),
            start_time: chrono::Utc.with_ymd_and_hms(2026, 9, 14, 10, 30, 0).unwrap(),
            status: AppointmentStatus::Confirmed,
        }
    }

    #[test]
    fn test_substitution_fills_all_variables() {
        let catalog = TemplateCatalog::new();
        let payload = catalog
            .render(NotificationKind::Confirmation, ChannelKind::WhatsApp, &make_appointment())
            .unwrap();
        assert!(payload.subject.is_none());
        assert!(payload.body.contains("Marta Ríos"));
        assert!(payload.body.contains("Ortodoncia"));
        assert!(payload.body.contains("14/09/2026"));
        assert!(payload.body.contains("10:30"));
        assert!(!payload.body.contains("{{"));
    }

    #[test]
    fn test_email_gets_subject() {
        let catalog = TemplateCatalog::new();
        let payload = catalog
            .render(NotificationKind::Reminder, ChannelKind::Email, &make_appointment())
            .unwrap();
        assert_eq!(payload.subject.as_deref(), Some("Recordatorio de cita — 14/09/2026"));
    }

    #[test]
    fn test_override_replaces_stock_wording() {
        let catalog = TemplateCatalog::new().with_template(
            NotificationKind::Confirmation,
            ChannelKind::WhatsApp,
            Template { subject: None, body: "Cita el {{date}}, {{patient_name}}.".into() },
        );
        let payload = catalog
            .render(NotificationKind::Confirmation, ChannelKind::WhatsApp, &make_appointment())
            .unwrap();
        assert_eq!(payload.body, "Cita el 14/09/2026, Marta Ríos.");
    }

    #[test]
    fn test_custom_has_no_stock_template() {
        let catalog = TemplateCatalog::new();
        let err = catalog
            .render(NotificationKind::Custom, ChannelKind::Email, &make_appointment())
            .unwrap_err();
        assert!(matches!(err, DentiqError::Template(_)));

        let payload = catalog.render_custom(ChannelKind::Email, "Cerramos en agosto");
        assert!(payload.subject.is_some());
        assert_eq!(payload.body, "Cerramos en agosto");
    }
}
