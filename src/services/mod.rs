pub mod captcha_solver;
pub mod notifier;

pub use captcha_solver::{
    build_solver, is_plausible_guess, normalize_guess, CaptchaSolver, LlmCaptchaSolver,
    OcrServiceSolver, CAPTCHA_LENGTH,
};
pub use notifier::{
    notification_policy, LogNotifier, NotificationKind, NotificationSummary, NotificationTrigger,
    Notifier, WebhookNotifier,
};
