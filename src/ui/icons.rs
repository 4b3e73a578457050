pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const LINK: &str = "🔗";
    pub const DATABASE: &str = "🗄️";
    pub const GEAR: &str = "⚙️";
    pub const BRANCH: &str = "🌿";
    pub const TAG: &str = "🏷️";
    pub const COMMIT: &str = "🔹";
    pub const BROOM: &str = "🧹";
}
